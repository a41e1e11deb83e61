//! Mailbox addresses (`"Name" <local@domain>`).

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::{Error, Result};
use std::fmt;

/// A single mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mailbox {
    /// Display name, RFC 2047 decoded.
    pub name: Option<String>,
    /// Address in `local@domain` form.
    pub email: String,
}

impl Mailbox {
    /// Creates a mailbox without a display name.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    /// Parses a single mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input holds exactly one address
    /// containing `@`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut list = parse_address_list(s);
        match (list.pop(), list.is_empty()) {
            (Some(mailbox), true) if mailbox.email.contains('@') => Ok(mailbox),
            _ => Err(Error::InvalidAddress(s.to_string())),
        }
    }

    /// Returns the domain part of the address.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.email.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// Returns the display name, or the address when there is none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

impl fmt::Display for Mailbox {
    /// Formats the mailbox for a header, encoding or quoting the name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            None => f.write_str(&self.email),
            Some(name) if !name.is_ascii() => {
                write!(f, "{} <{}>", encode_rfc2047(name), self.email)
            }
            Some(name) if name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.email)
            }
            Some(name) => write!(f, "{name} <{}>", self.email),
        }
    }
}

/// Formats a list of mailboxes as a comma separated header value.
#[must_use]
pub fn format_address_list(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses an address list header value.
///
/// Groups (`team: a@x, b@y;`) contribute their members. Comments are
/// dropped, except that a trailing comment on a bare address is used as
/// the display name. Empty entries are skipped.
#[must_use]
pub fn parse_address_list(s: &str) -> Vec<Mailbox> {
    split_entries(s)
        .into_iter()
        .filter_map(|entry| parse_entry(&entry))
        .collect()
}

/// An entry with comments extracted.
struct Entry {
    text: String,
    comment: Option<String>,
}

fn split_entries(s: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut text = String::new();
    let mut comment = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            if comment_depth > 0 {
                comment.push(c);
            } else {
                text.push(c);
            }
            escaped = false;
            continue;
        }

        if comment_depth > 0 {
            match c {
                '\\' => escaped = true,
                '(' => {
                    comment_depth += 1;
                    comment.push(c);
                }
                ')' => {
                    comment_depth -= 1;
                    if comment_depth > 0 {
                        comment.push(c);
                    }
                }
                _ => comment.push(c),
            }
            continue;
        }

        match c {
            '\\' if in_quotes => {
                text.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                text.push(c);
            }
            '(' if !in_quotes => comment_depth = 1,
            '<' if !in_quotes => {
                in_angle = true;
                text.push(c);
            }
            '>' if !in_quotes => {
                in_angle = false;
                text.push(c);
            }
            // Group display name: everything so far names the group.
            ':' if !in_quotes && !in_angle => {
                text.clear();
                comment.clear();
            }
            ',' | ';' if !in_quotes && !in_angle => {
                entries.push(Entry {
                    text: std::mem::take(&mut text),
                    comment: take_comment(&mut comment),
                });
            }
            _ => text.push(c),
        }
    }

    entries.push(Entry {
        text,
        comment: take_comment(&mut comment),
    });
    entries
}

fn take_comment(comment: &mut String) -> Option<String> {
    let taken = std::mem::take(comment);
    let trimmed = taken.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_entry(entry: &Entry) -> Option<Mailbox> {
    let text = entry.text.trim();
    if text.is_empty() {
        return None;
    }

    if let (Some(open), Some(close)) = (text.rfind('<'), text.rfind('>')) {
        if open < close {
            let email = text[open + 1..close].trim();
            // Source-routed addresses: <@relay:user@host>
            let email = email.rsplit_once(':').map_or(email, |(_, addr)| addr);
            if email.is_empty() {
                return None;
            }
            let name = unquote_name(text[..open].trim());
            let mailbox = Mailbox::new(email);
            return Some(match name {
                Some(name) => mailbox.with_name(name),
                None => mailbox,
            });
        }
    }

    let email = text.trim_matches('"');
    let mailbox = Mailbox::new(email);
    Some(match &entry.comment {
        Some(comment) => mailbox.with_name(decode_rfc2047(comment)),
        None => mailbox,
    })
}

fn unquote_name(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let name = if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        decode_rfc2047(&out)
    } else {
        decode_rfc2047(raw)
    };
    let name = name.trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn bare_address() {
            let list = parse_address_list("alice@example.com");
            assert_eq!(list, vec![Mailbox::new("alice@example.com")]);
        }

        #[test]
        fn named_addresses() {
            let list = parse_address_list(
                "\"Smith, John\" <john@example.com>, Jane Doe <jane@example.org>",
            );
            assert_eq!(list.len(), 2);
            assert_eq!(list[0].name.as_deref(), Some("Smith, John"));
            assert_eq!(list[0].email, "john@example.com");
            assert_eq!(list[1].name.as_deref(), Some("Jane Doe"));
        }

        #[test]
        fn comment_as_name() {
            let list = parse_address_list("bob@example.com (Bob Builder)");
            assert_eq!(list[0].name.as_deref(), Some("Bob Builder"));
            assert_eq!(list[0].email, "bob@example.com");
        }

        #[test]
        fn groups_contribute_members() {
            let list = parse_address_list("team: a@x.org, b@y.org;, c@z.org");
            let emails: Vec<_> = list.iter().map(|m| m.email.as_str()).collect();
            assert_eq!(emails, vec!["a@x.org", "b@y.org", "c@z.org"]);
        }

        #[test]
        fn encoded_name() {
            let list = parse_address_list("=?utf-8?Q?Ren=C3=A9?= <rene@example.fr>");
            assert_eq!(list[0].name.as_deref(), Some("René"));
        }

        #[test]
        fn empty_entries_skipped() {
            assert!(parse_address_list("").is_empty());
            assert_eq!(parse_address_list("a@b.c, ,").len(), 1);
        }

        #[test]
        fn single_mailbox_parse() {
            assert!(Mailbox::parse("x <x@y.z>").is_ok());
            assert!(Mailbox::parse("a@b.c, d@e.f").is_err());
            assert!(Mailbox::parse("nobody").is_err());
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn quotes_special_names() {
            let mb = Mailbox::new("john@example.com").with_name("Smith, John");
            assert_eq!(mb.to_string(), "\"Smith, John\" <john@example.com>");
        }

        #[test]
        fn encodes_non_ascii_names() {
            let mb = Mailbox::new("rene@example.fr").with_name("René");
            let formatted = mb.to_string();
            assert!(formatted.starts_with("=?utf-8?B?"));
            assert_eq!(parse_address_list(&formatted), vec![mb]);
        }

        #[test]
        fn list_round_trips() {
            let list = vec![
                Mailbox::new("a@x.org").with_name("A"),
                Mailbox::new("b@y.org"),
            ];
            assert_eq!(parse_address_list(&format_address_list(&list)), list);
        }
    }
}
