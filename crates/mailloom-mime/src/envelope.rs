//! Envelope summary shared by the cache and the conversation index.

use crate::address::Mailbox;
use chrono::{DateTime, Utc};

/// The header fields a client needs to list and thread a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    /// Decoded subject.
    pub subject: Option<String>,
    /// Sender mailboxes.
    pub from: Vec<Mailbox>,
    /// Primary recipients.
    pub to: Vec<Mailbox>,
    /// Carbon-copy recipients.
    pub cc: Vec<Mailbox>,
    /// Origination date.
    pub date: Option<DateTime<Utc>>,
    /// Own message identifier.
    pub message_id: Option<String>,
    /// Identifiers of the message(s) this one replies to.
    pub in_reply_to: Vec<String>,
    /// Ancestor identifiers, oldest first.
    pub references: Vec<String>,
}

impl Envelope {
    /// Every identifier this message points at: references then
    /// in-reply-to, deduplicated.
    #[must_use]
    pub fn parent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.references.iter().chain(&self.in_reply_to) {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }

    /// First sender, if any.
    #[must_use]
    pub fn sender(&self) -> Option<&Mailbox> {
        self.from.first()
    }
}

/// Parses an RFC 5322 date, tolerating a trailing comment and a missing
/// day-of-week.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = match value.find('(') {
        Some(index) => &value[..index],
        None => value,
    }
    .trim();

    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .or_else(|| {
            // Weekday mismatches are common; retry without it.
            let without_weekday = trimmed.split_once(',').map_or(trimmed, |(_, rest)| rest.trim());
            DateTime::parse_from_str(without_weekday, "%d %b %Y %H:%M:%S %z").ok()
        })
        .map(|date| date.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parent_ids_dedup() {
        let envelope = Envelope {
            in_reply_to: vec!["b@x".into()],
            references: vec!["a@x".into(), "b@x".into()],
            ..Envelope::default()
        };
        assert_eq!(envelope.parent_ids(), vec!["a@x", "b@x"]);
    }

    #[test]
    fn parse_date_with_comment() {
        let date = parse_date("Tue, 1 Jul 2025 10:52:37 +0200 (CEST)");
        let date = date.map(|d| (d.year(), d.hour()));
        assert_eq!(date, Some((2025, 8)));
    }

    #[test]
    fn parse_date_wrong_weekday() {
        assert!(parse_date("Mon, 1 Jul 2025 10:52:37 +0000").is_some());
    }

    #[test]
    fn parse_date_garbage() {
        assert!(parse_date("yesterday").is_none());
    }
}
