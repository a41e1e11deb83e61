//! `Content-Type` and `Content-Disposition` values.

use crate::encoding::decode_charset;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart"), lowercased.
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg"), lowercased.
    pub sub_type: String,
    /// Parameters keyed by lowercased name.
    pub parameters: BTreeMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_ascii_lowercase(),
            sub_type: sub_type.into().to_ascii_lowercase(),
            parameters: BTreeMap::new(),
        }
    }

    /// Creates a `text/plain; charset=utf-8` content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Creates a `text/html; charset=utf-8` content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Creates a multipart content type of the given subtype with boundary.
    #[must_use]
    pub fn multipart(sub_type: &str, boundary: impl Into<String>) -> Self {
        Self::new("multipart", sub_type).with_parameter("boundary", boundary)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true if this is `main/sub` (case-insensitive).
    #[must_use]
    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main) && self.sub_type.eq_ignore_ascii_case(sub)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the `name` parameter if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Parses a content type value.
    ///
    /// Format: `type/subtype; param1=value1; param2="quoted; value"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = split_value(s);

        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;
        let main_type = main_type.trim();
        let sub_type = sub_type.trim();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = params;
        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        write_parameters(f, &self.parameters)
    }
}

/// Disposition of a body part (`inline` or `attachment`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type, lowercased.
    pub kind: String,
    /// Parameters keyed by lowercased name.
    pub parameters: BTreeMap<String, String>,
}

impl ContentDisposition {
    /// Creates an `attachment` disposition with a filename.
    #[must_use]
    pub fn attachment(filename: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("filename".to_string(), filename.into());
        Self {
            kind: "attachment".to_string(),
            parameters,
        }
    }

    /// Parses a `Content-Disposition` value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, parameters) = split_value(s);
        Self {
            kind: kind.trim().to_ascii_lowercase(),
            parameters,
        }
    }

    /// Returns true for `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }

    /// Returns the filename parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        write_parameters(f, &self.parameters)
    }
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &BTreeMap<String, String>) -> fmt::Result {
    for (key, value) in parameters {
        if value.is_empty()
            || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
        {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "; {key}=\"{escaped}\"")?;
        } else {
            write!(f, "; {key}={value}")?;
        }
    }
    Ok(())
}

/// Splits `value; a=b; c="d"` into the leading token and its parameters.
fn split_value(s: &str) -> (&str, BTreeMap<String, String>) {
    let mut segments = split_unquoted(s, ';').into_iter();
    let head = segments.next().unwrap_or("");
    let mut parameters = BTreeMap::new();

    for segment in segments {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());

        // RFC 2231 extended value: charset'language'percent-encoded
        if let Some(base) = key.strip_suffix('*') {
            parameters.insert(base.to_string(), decode_extended(&value));
        } else {
            parameters.entry(key).or_insert(value);
        }
    }

    (head.trim(), parameters)
}

fn split_unquoted(s: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                segments.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&s[start..]);
    segments
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
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
    out
}

fn decode_extended(value: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let (Some(charset), Some(_language), Some(encoded)) =
        (pieces.next(), pieces.next(), pieces.next())
    else {
        return value.to_string();
    };

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let byte = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    decode_charset(&decoded, charset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted_with_semicolon() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"a;b=c\"; x=1").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("a;b=c"));
        assert_eq!(ct.parameters.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_content_type_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_content_type_display_quotes() {
        let ct = ContentType::multipart("alternative", "b=1");
        assert_eq!(ct.to_string(), "multipart/alternative; boundary=\"b=1\"");
        assert_eq!(ContentType::parse(&ct.to_string()).unwrap(), ct);
    }

    #[test]
    fn test_disposition_parse() {
        let d = ContentDisposition::parse("attachment; filename=\"report q3.pdf\"");
        assert!(d.is_attachment());
        assert_eq!(d.filename(), Some("report q3.pdf"));
    }

    #[test]
    fn test_disposition_extended_filename() {
        let d = ContentDisposition::parse("attachment; filename*=utf-8''caf%C3%A9.txt");
        assert_eq!(d.filename(), Some("café.txt"));
    }
}
