//! Parsed message structure.

use crate::address::{Mailbox, parse_address_list};
use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::envelope::{Envelope, parse_date};
use crate::error::{Error, Result};
use crate::header::{Headers, split_entity};
use crate::message_id::{parse_msg_id, parse_msg_id_list};
use std::fmt;

/// Deepest multipart nesting accepted by the parser.
pub const MAX_NESTING: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Decodes a body encoded with this transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid Base64 payloads.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            Self::QuotedPrintable => Ok(decode_quoted_printable(body)),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// One MIME entity: headers plus either a leaf body or child parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Entity headers.
    pub headers: Headers,
    /// Raw (still transfer-encoded) body. For multiparts this is the
    /// preamble-to-epilogue text the children were split from.
    pub body: Vec<u8>,
    /// Child entities of a multipart; empty for leaves.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    /// Parses a raw entity, recursing into multipart bodies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooDeep`] when multiparts nest beyond
    /// [`MAX_NESTING`].
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_NESTING {
            return Err(Error::TooDeep(MAX_NESTING));
        }

        let (head, body) = split_entity(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head));
        let mut part = Self::new(headers, body.to_vec());

        let content_type = part.content_type();
        if let (true, Some(boundary)) = (content_type.is_multipart(), content_type.boundary()) {
            for child in split_multipart(body, boundary) {
                part.parts.push(Self::parse_at_depth(child, depth + 1)?);
            }
        }

        Ok(part)
    }

    /// Gets the content type, defaulting to `text/plain` when the header
    /// is absent or unparseable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Gets the content disposition if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Returns true if this part has child parts.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Returns true if this leaf is an attachment rather than body text.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if self.is_multipart() {
            return false;
        }
        if let Some(disposition) = self.disposition() {
            if disposition.is_attachment() {
                return true;
            }
        }
        !self.content_type().is_text() && self.filename().is_some()
    }

    /// Returns the attachment filename from the disposition or the
    /// content type `name` parameter.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition()
            .and_then(|d| d.filename().map(str::to_string))
            .or_else(|| self.content_type().name().map(str::to_string))
            .map(|name| crate::encoding::decode_rfc2047(&name))
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        self.transfer_encoding().decode(&self.body)
    }

    /// Gets the decoded body as text using the part's charset.
    ///
    /// # Errors
    ///
    /// Returns an error if transfer decoding fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        let content_type = self.content_type();
        Ok(decode_charset(&decoded, content_type.charset().unwrap_or("utf-8")))
    }

    /// Visits leaf parts depth-first.
    pub fn leaves(&self) -> Box<dyn Iterator<Item = &Self> + '_> {
        if self.parts.is_empty() {
            Box::new(std::iter::once(self))
        } else {
            Box::new(self.parts.iter().flat_map(Self::leaves))
        }
    }

    fn first_inline(&self, sub_type: &str) -> Option<&Self> {
        self.leaves()
            .find(|leaf| leaf.content_type().is("text", sub_type) && !leaf.is_attachment())
    }
}

/// Splits a multipart body on its boundary, discarding preamble and
/// epilogue. A missing close delimiter keeps the trailing part.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i);
        let line = &body[pos..line_end];

        if let Some(rest) = line.strip_prefix(delimiter) {
            let rest = rest.trim_ascii_end();
            let closing = rest == b"--";
            if closing || rest.is_empty() {
                if let Some(start) = current.take() {
                    parts.push(trim_line_break(&body[start..pos.max(start)]));
                }
                if closing {
                    return parts;
                }
                current = Some((line_end + 1).min(body.len()));
            }
        }

        pos = line_end + 1;
    }

    if let Some(start) = current {
        if start < body.len() {
            parts.push(&body[start..]);
        }
    }
    parts
}

/// Drops the line break that belongs to the following delimiter.
fn trim_line_break(part: &[u8]) -> &[u8] {
    let part = part.strip_suffix(b"\n").unwrap_or(part);
    part.strip_suffix(b"\r").unwrap_or(part)
}

/// A parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Top-level entity; its headers are the message headers.
    pub root: Part,
}

impl Message {
    /// Parses a complete RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Returns an error if multipart nesting is too deep.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(Self {
            root: Part::parse(raw)?,
        })
    }

    /// Message headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Decoded subject.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers().get_decoded("subject")
    }

    /// `From` mailboxes.
    #[must_use]
    pub fn from(&self) -> Vec<Mailbox> {
        self.address_header("from")
    }

    /// `To` mailboxes.
    #[must_use]
    pub fn to(&self) -> Vec<Mailbox> {
        self.address_header("to")
    }

    /// `Cc` mailboxes.
    #[must_use]
    pub fn cc(&self) -> Vec<Mailbox> {
        self.address_header("cc")
    }

    fn address_header(&self, name: &str) -> Vec<Mailbox> {
        self.headers()
            .get_all(name)
            .into_iter()
            .flat_map(parse_address_list)
            .collect()
    }

    /// `Message-ID` without brackets.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.headers().get("message-id").and_then(parse_msg_id)
    }

    /// `In-Reply-To` identifiers.
    #[must_use]
    pub fn in_reply_to(&self) -> Vec<String> {
        self.headers()
            .get("in-reply-to")
            .map(parse_msg_id_list)
            .unwrap_or_default()
    }

    /// `References` identifiers, oldest first.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.headers()
            .get_all("references")
            .into_iter()
            .flat_map(parse_msg_id_list)
            .collect()
    }

    /// First inline `text/plain` body, decoded.
    #[must_use]
    pub fn text_body(&self) -> Option<String> {
        self.root.first_inline("plain").and_then(|p| p.body_text().ok())
    }

    /// First inline `text/html` body, decoded.
    #[must_use]
    pub fn html_body(&self) -> Option<String> {
        self.root.first_inline("html").and_then(|p| p.body_text().ok())
    }

    /// Attachment leaves.
    #[must_use]
    pub fn attachments(&self) -> Vec<&Part> {
        self.root.leaves().filter(|p| p.is_attachment()).collect()
    }

    /// Envelope summary of this message.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope {
            subject: self.subject(),
            from: self.from(),
            to: self.to(),
            cc: self.cc(),
            date: self.headers().get("date").and_then(parse_date),
            message_id: self.message_id(),
            in_reply_to: self.in_reply_to(),
            references: self.references(),
        }
    }
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

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, carol@example.com\r\n\
Subject: =?utf-8?Q?Caf=C3=A9?= plans\r\n\
Date: Tue, 01 Jul 2025 10:52:37 +0200 (CEST)\r\n\
Message-ID: <m2@example.com>\r\n\
In-Reply-To: <m1@example.com>\r\n\
References: <m0@example.com>\r\n <m1@example.com>\r\n\
\r\n\
See you at noon.\r\n";

    const MULTIPART: &[u8] = b"From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
caf=E9\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>cafe</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"q3.pdf\"\r\n\
Content-Disposition: attachment; filename=\"q3.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer--\r\n\
epilogue\r\n";

    mod transfer_encoding_tests {
        use super::*;

        #[test]
        fn parse() {
            assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
            assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
            assert_eq!(
                TransferEncoding::parse("quoted-printable"),
                TransferEncoding::QuotedPrintable
            );
        }
    }

    mod simple_tests {
        use super::*;

        #[test]
        fn header_accessors() {
            let message = Message::parse(SIMPLE).unwrap();
            assert_eq!(message.subject().as_deref(), Some("Café plans"));
            assert_eq!(message.from()[0].email, "alice@example.com");
            assert_eq!(message.to().len(), 2);
            assert_eq!(message.message_id().as_deref(), Some("m2@example.com"));
            assert_eq!(message.in_reply_to(), vec!["m1@example.com"]);
            assert_eq!(message.references(), vec!["m0@example.com", "m1@example.com"]);
        }

        #[test]
        fn text_body() {
            let message = Message::parse(SIMPLE).unwrap();
            assert_eq!(message.text_body().as_deref(), Some("See you at noon.\r\n"));
            assert!(message.html_body().is_none());
            assert!(message.attachments().is_empty());
        }

        #[test]
        fn envelope_carries_links() {
            let envelope = Message::parse(SIMPLE).unwrap().envelope();
            assert_eq!(envelope.message_id.as_deref(), Some("m2@example.com"));
            assert_eq!(envelope.references.len(), 2);
            assert!(envelope.date.is_some());
        }

        #[test]
        fn headerless_body() {
            let message = Message::parse(b"\r\njust text").unwrap();
            assert!(message.headers().is_empty());
            assert_eq!(message.text_body().as_deref(), Some("just text"));
        }
    }

    mod multipart_tests {
        use super::*;

        #[test]
        fn nested_structure() {
            let message = Message::parse(MULTIPART).unwrap();
            assert_eq!(message.root.parts.len(), 2);
            assert_eq!(message.root.parts[0].parts.len(), 2);
            assert_eq!(message.root.leaves().count(), 3);
        }

        #[test]
        fn bodies_are_decoded() {
            let message = Message::parse(MULTIPART).unwrap();
            assert_eq!(message.text_body().as_deref(), Some("café"));
            assert_eq!(message.html_body().as_deref(), Some("<p>cafe</p>"));
        }

        #[test]
        fn attachments() {
            let message = Message::parse(MULTIPART).unwrap();
            let attachments = message.attachments();
            assert_eq!(attachments.len(), 1);
            assert_eq!(attachments[0].filename().as_deref(), Some("q3.pdf"));
            assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF-");
        }

        #[test]
        fn unterminated_multipart_keeps_last_part() {
            let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\none\r\n--b\r\n\r\ntwo";
            let message = Message::parse(raw).unwrap();
            assert_eq!(message.root.parts.len(), 2);
            assert_eq!(message.root.parts[1].body, b"two");
        }

        #[test]
        fn nesting_limit() {
            let mut raw = Vec::new();
            for depth in 0..=MAX_NESTING + 1 {
                raw.extend_from_slice(
                    format!("Content-Type: multipart/mixed; boundary=b{depth}\r\n\r\n--b{depth}\r\n")
                        .as_bytes(),
                );
            }
            assert!(matches!(Message::parse(&raw), Err(Error::TooDeep(_))));
        }
    }
}
