//! `Message-ID`, `In-Reply-To` and `References` values.
//!
//! Identifiers are returned without their angle brackets and compare
//! byte-exact.

/// Parses the first message identifier in a header value.
#[must_use]
pub fn parse_msg_id(s: &str) -> Option<String> {
    parse_msg_id_list(s).into_iter().next()
}

/// Parses every message identifier in a header value, in order.
///
/// Bracketed ids are preferred. Values without brackets (seen from some
/// broken mailers) are split on whitespace and kept when they contain
/// `@`. Comments in parentheses are ignored. Duplicates are removed,
/// keeping the first occurrence.
#[must_use]
pub fn parse_msg_id_list(s: &str) -> Vec<String> {
    let cleaned = strip_comments(s);
    let mut ids: Vec<String> = Vec::new();

    if cleaned.contains('<') {
        let mut rest = cleaned.as_str();
        while let Some(open) = rest.find('<') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('>') else {
                break;
            };
            let id: String = after[..close].split_whitespace().collect();
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
            rest = &after[close + 1..];
        }
    } else {
        for token in cleaned.split_whitespace() {
            if token.contains('@') && !ids.iter().any(|id| id == token) {
                ids.push(token.to_string());
            }
        }
    }

    ids
}

/// Formats identifiers as a `References`-style header value.
#[must_use]
pub fn format_msg_id_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("<{id}>"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut in_angle = false;

    for c in s.chars() {
        match c {
            '<' if depth == 0 => {
                in_angle = true;
                out.push(c);
            }
            '>' if depth == 0 => {
                in_angle = false;
                out.push(c);
            }
            '(' if !in_angle => depth += 1,
            ')' if !in_angle && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id() {
        assert_eq!(
            parse_msg_id(" <abc.123@example.com> ").as_deref(),
            Some("abc.123@example.com")
        );
        assert_eq!(parse_msg_id(""), None);
    }

    #[test]
    fn references_list_keeps_order() {
        let ids = parse_msg_id_list("<a@x>\r\n <b@y> <c@z>");
        assert_eq!(ids, vec!["a@x", "b@y", "c@z"]);
    }

    #[test]
    fn comments_and_duplicates() {
        let ids = parse_msg_id_list("<a@x> (the original) <a@x> <b@y>");
        assert_eq!(ids, vec!["a@x", "b@y"]);
    }

    #[test]
    fn unbracketed_ids() {
        let ids = parse_msg_id_list("a@x junk b@y");
        assert_eq!(ids, vec!["a@x", "b@y"]);
    }

    #[test]
    fn in_reply_to_with_trailing_text() {
        let id = parse_msg_id("<m1@host> (Alice's message of Monday)");
        assert_eq!(id.as_deref(), Some("m1@host"));
    }

    #[test]
    fn format_round_trip() {
        let ids = vec!["a@x".to_string(), "b@y".to_string()];
        assert_eq!(format_msg_id_list(&ids), "<a@x> <b@y>");
        assert_eq!(parse_msg_id_list(&format_msg_id_list(&ids)), ids);
    }
}
