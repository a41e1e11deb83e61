//! Header block handling.

use crate::encoding::decode_rfc2047;
use std::fmt;

/// Ordered collection of header fields.
///
/// Names compare case-insensitively; insertion order is preserved so a
/// composed message serializes its fields in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Sets a header field, replacing any existing values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets the first value for a header with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Gets all raw values for a header, in order of appearance.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns an iterator over all fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses a header block.
    ///
    /// Folded continuation lines are unfolded into a single space. Parsing
    /// stops at the first empty line. Lines without a colon are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(' ') {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        headers
    }
}

impl fmt::Display for Headers {
    /// Writes the fields as `Name: value` lines terminated by CRLF.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

/// Splits a raw entity into its header block and body.
///
/// The blank line separating them is consumed. An entity with no blank
/// line is all header.
#[must_use]
pub fn split_entity(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n") {
        return (&[], body);
    }
    if let Some(body) = raw.strip_prefix(b"\n") {
        return (&[], body);
    }

    for (i, &byte) in raw.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        let next = &raw[i + 1..];
        if next.starts_with(b"\r\n") {
            return (&raw[..=i], &raw[i + 3..]);
        }
        if next.starts_with(b"\n") {
            return (&raw[..=i], &raw[i + 2..]);
        }
    }

    (raw, &[])
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_set_replaces() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
    }

    #[test]
    fn test_headers_parse_unfolds() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "Subject: Test\r\n",
            "  Message\r\n",
            "Content-Type: text/plain;\r\n",
            "\tcharset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert!(headers.get("Body").is_none());
    }

    #[test]
    fn test_headers_decoded() {
        let headers = Headers::parse("Subject: =?utf-8?B?SMOpbGxv?= world\r\n");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo world"));
    }

    #[test]
    fn test_headers_display_keeps_order() {
        let mut headers = Headers::new();
        headers.add("To", "recipient@example.com");
        headers.add("From", "sender@example.com");

        assert_eq!(
            headers.to_string(),
            "To: recipient@example.com\r\nFrom: sender@example.com\r\n"
        );
    }

    #[test]
    fn test_split_entity() {
        let (head, body) = split_entity(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        assert_eq!(head, b"A: 1\r\nB: 2\r\n");
        assert_eq!(body, b"body\r\n");

        let (head, body) = split_entity(b"\r\nonly body");
        assert!(head.is_empty());
        assert_eq!(body, b"only body");

        let (head, body) = split_entity(b"A: 1\nB: 2");
        assert_eq!(head, b"A: 1\nB: 2");
        assert!(body.is_empty());
    }
}
