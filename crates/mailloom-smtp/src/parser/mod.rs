//! Reply parser.
//!
//! A reply is one or more lines `ddd-text` ending with a line `ddd text`
//! (or a bare `ddd`); every line carries the same code.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses the lines of one reply.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for an empty reply, a malformed code or
/// lines whose codes disagree.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("empty reply".into()));
    };
    let code = reply_code(first)?;

    let mut text = Vec::with_capacity(lines.len());
    for line in lines {
        if reply_code(line)? != code {
            return Err(Error::Protocol(format!("mixed reply codes: {line}")));
        }
        text.push(line.get(4..).unwrap_or_default().to_string());
    }
    Ok(Reply::new(code, text))
}

fn reply_code(line: &str) -> Result<ReplyCode> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("malformed reply line: {line}")))?;
    match line.as_bytes().get(3) {
        None | Some(b' ' | b'-') => {}
        Some(_) => return Err(Error::Protocol(format!("malformed reply line: {line}"))),
    }
    digits
        .parse::<u16>()
        .map(ReplyCode::new)
        .map_err(|_| Error::Protocol(format!("malformed reply code: {digits}")))
}

/// Returns true for the final line of a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || line.as_bytes().get(3) == Some(&b' ')
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn single_line() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.lines, vec!["OK"]);
    }

    #[test]
    fn multi_line_ehlo() {
        let reply = parse_reply(&lines(&["250-mx.example.org", "250-PIPELINING", "250 SIZE 1000"])).unwrap();
        assert_eq!(reply.lines, vec!["mx.example.org", "PIPELINING", "SIZE 1000"]);
    }

    #[test]
    fn bare_code() {
        let reply = parse_reply(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.lines, vec![""]);
        assert!(is_last_reply_line("354"));
    }

    #[test]
    fn last_line_detection() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-more"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn malformed_replies_rejected() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250xOK"])).is_err());
        assert!(parse_reply(&lines(&["250-a", "251 b"])).is_err());
    }
}
