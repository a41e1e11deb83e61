//! Outgoing message composition.

use crate::address::{Mailbox, format_address_list};
use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{encode_base64_lines, encode_quoted_printable, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message_id::format_msg_id_list;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME type of the content.
    pub content_type: ContentType,
    /// Raw content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: ContentType, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }
}

/// A composed message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    /// Envelope sender address.
    pub sender: String,
    /// Envelope recipients (To, Cc and Bcc).
    pub recipients: Vec<String>,
    /// Message identifier without brackets.
    pub message_id: String,
    /// RFC 5322 bytes with CRLF line endings.
    pub bytes: Vec<u8>,
}

/// Builder for outgoing messages.
///
/// # Example
///
/// ```
/// use mailloom_mime::{Mailbox, MessageBuilder};
///
/// let message = MessageBuilder::new()
///     .from(Mailbox::new("me@example.com"))
///     .to(Mailbox::new("you@example.com"))
///     .subject("Lunch")
///     .text_body("Noon?")
///     .build()
///     .unwrap();
/// assert_eq!(message.recipients, vec!["you@example.com"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    bcc: Vec<Mailbox>,
    subject: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    in_reply_to: Option<String>,
    references: Vec<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from = Some(mailbox);
        self
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    /// Adds a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, mailbox: Mailbox) -> Self {
        self.cc.push(mailbox);
        self
    }

    /// Adds a blind recipient. Never written to the headers.
    #[must_use]
    pub fn bcc(mut self, mailbox: Mailbox) -> Self {
        self.bcc.push(mailbox);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the date; defaults to now.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the message identifier; one is generated otherwise.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Marks the message as a reply.
    ///
    /// `references` is the parent's own reference chain; the parent id is
    /// appended to it.
    #[must_use]
    pub fn in_reply_to(mut self, parent_id: impl Into<String>, references: Vec<String>) -> Self {
        let parent_id = parent_id.into();
        self.references = references;
        if !self.references.contains(&parent_id) {
            self.references.push(parent_id.clone());
        }
        self.in_reply_to = Some(parent_id);
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets an HTML alternative body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Produces the message bytes and envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] without a sender or recipients.
    pub fn build(self) -> Result<ComposedMessage> {
        let from = self
            .from
            .ok_or_else(|| Error::MissingHeader("From".to_string()))?;
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(Error::MissingHeader("To".to_string()));
        }

        let message_id = self.message_id.unwrap_or_else(|| {
            generate_message_id(from.domain().unwrap_or("localhost"))
        });
        let date = self.date.unwrap_or_else(Utc::now);

        let mut headers = Headers::new();
        headers.add("Date", date.to_rfc2822());
        headers.add("From", from.to_string());
        if !self.to.is_empty() {
            headers.add("To", format_address_list(&self.to));
        }
        if !self.cc.is_empty() {
            headers.add("Cc", format_address_list(&self.cc));
        }
        headers.add(
            "Subject",
            encode_rfc2047(self.subject.as_deref().unwrap_or_default()),
        );
        headers.add("Message-ID", format!("<{message_id}>"));
        if let Some(parent) = &self.in_reply_to {
            headers.add("In-Reply-To", format!("<{parent}>"));
        }
        if !self.references.is_empty() {
            headers.add("References", format_msg_id_list(&self.references));
        }
        headers.add("MIME-Version", "1.0");

        let body = body_entity(self.text.as_deref(), self.html.as_deref());
        let entity = if self.attachments.is_empty() {
            body
        } else {
            let mut children = vec![body];
            children.extend(self.attachments.iter().map(attachment_entity));
            multipart_entity("mixed", children)
        };

        let mut bytes = headers.to_string().into_bytes();
        bytes.extend_from_slice(&entity);

        let recipients = self
            .to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|m| m.email.clone())
            .fold(Vec::new(), |mut acc, email| {
                if !acc.contains(&email) {
                    acc.push(email);
                }
                acc
            });

        Ok(ComposedMessage {
            sender: from.email,
            recipients,
            message_id,
            bytes,
        })
    }
}

/// Header lines (without the leading message headers) plus body for the
/// text/html part of the message.
fn body_entity(text: Option<&str>, html: Option<&str>) -> Vec<u8> {
    match (text, html) {
        (text, Some(html)) => multipart_entity(
            "alternative",
            vec![
                text_entity(text.unwrap_or_default(), ContentType::text_plain()),
                text_entity(html, ContentType::text_html()),
            ],
        ),
        (text, None) => text_entity(text.unwrap_or_default(), ContentType::text_plain()),
    }
}

fn text_entity(text: &str, content_type: ContentType) -> Vec<u8> {
    let plain = text.is_ascii() && text.lines().all(|line| line.len() <= 998);
    let (encoding, body) = if plain {
        ("7bit", normalize_line_endings(text))
    } else {
        ("quoted-printable", encode_quoted_printable(text))
    };
    format!(
        "Content-Type: {content_type}\r\nContent-Transfer-Encoding: {encoding}\r\n\r\n{body}"
    )
    .into_bytes()
}

fn attachment_entity(attachment: &Attachment) -> Vec<u8> {
    let content_type = attachment
        .content_type
        .clone()
        .with_parameter("name", attachment.filename.clone());
    let disposition = ContentDisposition::attachment(attachment.filename.clone());
    format!(
        "Content-Type: {content_type}\r\nContent-Disposition: {disposition}\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
        encode_base64_lines(&attachment.data)
    )
    .into_bytes()
}

fn multipart_entity(sub_type: &str, children: Vec<Vec<u8>>) -> Vec<u8> {
    let boundary = generate_boundary();
    let content_type = ContentType::multipart(sub_type, boundary.clone());
    let mut out = format!("Content-Type: {content_type}\r\n\r\n").into_bytes();
    for child in children {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        out.extend_from_slice(&child);
        // The line break before a delimiter belongs to the delimiter.
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

fn normalize_line_endings(text: &str) -> String {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn generate_boundary() -> String {
    let n = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("mailloom-{nanos:x}-{n}")
}

fn generate_message_id(domain: &str) -> String {
    let n = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{nanos:x}.{n}@{domain}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Message;

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from(Mailbox::new("me@example.com").with_name("Me"))
            .to(Mailbox::new("you@example.com"))
            .subject("Plans")
    }

    #[test]
    fn requires_sender_and_recipient() {
        assert!(matches!(
            MessageBuilder::new().to(Mailbox::new("a@b.c")).build(),
            Err(Error::MissingHeader(h)) if h == "From"
        ));
        assert!(matches!(
            MessageBuilder::new().from(Mailbox::new("a@b.c")).build(),
            Err(Error::MissingHeader(h)) if h == "To"
        ));
    }

    #[test]
    fn plain_message_parses_back() {
        let composed = base()
            .message_id("fixed@example.com")
            .text_body("line one\nline two")
            .build()
            .unwrap();

        let parsed = Message::parse(&composed.bytes).unwrap();
        assert_eq!(parsed.subject().as_deref(), Some("Plans"));
        assert_eq!(parsed.message_id().as_deref(), Some("fixed@example.com"));
        assert_eq!(parsed.text_body().as_deref(), Some("line one\r\nline two"));
        assert_eq!(composed.message_id, "fixed@example.com");
    }

    #[test]
    fn bcc_is_envelope_only() {
        let composed = base()
            .cc(Mailbox::new("cc@example.com"))
            .bcc(Mailbox::new("hidden@example.com"))
            .bcc(Mailbox::new("you@example.com"))
            .text_body("hi")
            .build()
            .unwrap();

        assert_eq!(
            composed.recipients,
            vec!["you@example.com", "cc@example.com", "hidden@example.com"]
        );
        let text = String::from_utf8(composed.bytes).unwrap();
        assert!(!text.contains("hidden@example.com"));
        assert!(!text.contains("Bcc"));
    }

    #[test]
    fn reply_headers() {
        let composed = base()
            .in_reply_to("parent@x", vec!["root@x".to_string()])
            .text_body("ack")
            .build()
            .unwrap();

        let parsed = Message::parse(&composed.bytes).unwrap();
        assert_eq!(parsed.in_reply_to(), vec!["parent@x"]);
        assert_eq!(parsed.references(), vec!["root@x", "parent@x"]);
    }

    #[test]
    fn alternative_with_attachment() {
        let composed = base()
            .subject("Résumé")
            .text_body("Bonjour")
            .html_body("<b>Bonjour</b>")
            .attach(Attachment::new(
                "cv.pdf",
                ContentType::new("application", "pdf"),
                b"%PDF-1.7".to_vec(),
            ))
            .build()
            .unwrap();

        let parsed = Message::parse(&composed.bytes).unwrap();
        assert_eq!(parsed.subject().as_deref(), Some("Résumé"));
        assert_eq!(parsed.text_body().as_deref(), Some("Bonjour"));
        assert_eq!(parsed.html_body().as_deref(), Some("<b>Bonjour</b>"));
        let attachments = parsed.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn non_ascii_body_is_quoted_printable() {
        let composed = base().text_body("naïve").build().unwrap();
        let text = String::from_utf8(composed.bytes.clone()).unwrap();
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable"));
        let parsed = Message::parse(&composed.bytes).unwrap();
        assert_eq!(parsed.text_body().as_deref(), Some("naïve"));
    }
}
