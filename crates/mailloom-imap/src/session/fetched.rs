//! Typed views over command outcomes.

use crate::parser::{Envelope, FetchItem, UntaggedResponse};
use crate::types::{Flags, SeqNum, Uid, UidSet};

/// One message from a UID FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Sequence number at fetch time.
    pub seq: SeqNum,
    /// UID.
    pub uid: Uid,
    /// Flags, if requested.
    pub flags: Option<Flags>,
    /// Mod-sequence, if requested or CONDSTORE is enabled.
    pub modseq: Option<u64>,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// INTERNALDATE, verbatim.
    pub internal_date: Option<String>,
    /// `BODY[HEADER...]` data.
    pub header: Option<Vec<u8>>,
    /// `BODY[]` data.
    pub body: Option<Vec<u8>>,
    /// ENVELOPE.
    pub envelope: Option<Envelope>,
}

impl FetchedMessage {
    /// Builds a message from FETCH items. `None` without a UID.
    #[must_use]
    pub fn from_items(seq: SeqNum, items: Vec<FetchItem>) -> Option<Self> {
        let uid = items.iter().find_map(|item| match item {
            FetchItem::Uid(uid) => Some(*uid),
            _ => None,
        })?;
        let mut message = Self {
            seq,
            uid,
            flags: None,
            modseq: None,
            size: None,
            internal_date: None,
            header: None,
            body: None,
            envelope: None,
        };
        for item in items {
            message.absorb(item);
        }
        Some(message)
    }

    fn absorb(&mut self, item: FetchItem) {
        match item {
            FetchItem::Flags(flags) => self.flags = Some(flags),
            FetchItem::ModSeq(modseq) => self.modseq = Some(modseq),
            FetchItem::Rfc822Size(size) => self.size = Some(size),
            FetchItem::InternalDate(date) => self.internal_date = Some(date),
            FetchItem::Envelope(envelope) => self.envelope = Some(*envelope),
            FetchItem::Body { section, data, .. } => match section.as_deref() {
                None | Some("") => self.body = data,
                Some(s) if s.to_ascii_uppercase().starts_with("HEADER") => self.header = data,
                Some(other) => tracing::debug!(section = other, "ignoring body section"),
            },
            FetchItem::Uid(_) => {}
        }
    }

    /// Parses the fetched header (or full body) into an envelope summary
    /// with references, which the IMAP ENVELOPE lacks.
    #[must_use]
    pub fn envelope_summary(&self) -> Option<mailloom_mime::Envelope> {
        let raw = self.header.as_deref().or(self.body.as_deref())?;
        match mailloom_mime::Message::parse(raw) {
            Ok(message) => Some(message.envelope()),
            Err(error) => {
                tracing::debug!(uid = self.uid.get(), %error, "unparseable header");
                None
            }
        }
    }
}

/// Collects FETCH data by UID. Repeated responses for one UID merge, the
/// later items winning; FETCH data without a UID is unsolicited and
/// dropped.
#[must_use]
pub fn collect_fetches(untagged: Vec<UntaggedResponse>) -> Vec<FetchedMessage> {
    let mut messages: Vec<FetchedMessage> = Vec::new();
    for response in untagged {
        let UntaggedResponse::Fetch { seq, items } = response else {
            continue;
        };
        let Some(message) = FetchedMessage::from_items(seq, items) else {
            continue;
        };
        match messages.iter_mut().find(|m| m.uid == message.uid) {
            Some(existing) => merge(existing, message),
            None => messages.push(message),
        }
    }
    messages
}

fn merge(into: &mut FetchedMessage, from: FetchedMessage) {
    into.seq = from.seq;
    into.flags = from.flags.or(into.flags.take());
    into.modseq = from.modseq.or(into.modseq);
    into.size = from.size.or(into.size);
    into.internal_date = from.internal_date.or(into.internal_date.take());
    into.header = from.header.or(into.header.take());
    into.body = from.body.or(into.body.take());
    into.envelope = from.envelope.or(into.envelope.take());
}

/// Result of a UID SEARCH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Matching UIDs in server order.
    pub uids: Vec<Uid>,
    /// Highest mod-sequence of the matches (CONDSTORE).
    pub modseq: Option<u64>,
}

impl SearchResult {
    /// Extracts SEARCH data from untagged responses.
    #[must_use]
    pub fn from_untagged(untagged: Vec<UntaggedResponse>) -> Self {
        let mut result = Self::default();
        for response in untagged {
            if let UntaggedResponse::Search { ids, modseq } = response {
                result.uids.extend(ids.into_iter().filter_map(Uid::new));
                result.modseq = modseq.or(result.modseq);
            }
        }
        result
    }
}

/// Result of a `UID FETCH ... (CHANGEDSINCE n)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedSince {
    /// Messages whose mod-sequence is above `n`.
    pub messages: Vec<FetchedMessage>,
    /// UIDs expunged since `n`, when QRESYNC reported them.
    pub vanished: Option<UidSet>,
}

impl ChangedSince {
    /// Splits FETCH and `VANISHED (EARLIER)` data.
    #[must_use]
    pub fn from_untagged(untagged: Vec<UntaggedResponse>) -> Self {
        let mut vanished: Vec<Uid> = Vec::new();
        let mut saw_vanished = false;
        let mut rest = Vec::with_capacity(untagged.len());
        for response in untagged {
            match response {
                UntaggedResponse::Vanished { uids, .. } => {
                    saw_vanished = true;
                    vanished.extend(uids.expand());
                }
                other => rest.push(other),
            }
        }
        Self {
            messages: collect_fetches(rest),
            vanished: saw_vanished.then(|| UidSet::from_uids(vanished)),
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
    use crate::parser::{Response, ResponseParser};
    use crate::types::Flag;

    fn untagged(lines: &[&[u8]]) -> Vec<UntaggedResponse> {
        lines
            .iter()
            .map(|line| match ResponseParser::parse(line).unwrap() {
                Response::Untagged(u) => u,
                other => panic!("expected untagged, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn fetch_with_header_fields() {
        let data = untagged(&[
            b"* 2 FETCH (UID 8 FLAGS (\\Seen) BODY[HEADER.FIELDS (SUBJECT MESSAGE-ID)] {44}\r\nSubject: hi\r\nMessage-ID: <a@example.org>\r\n\r\n)\r\n",
        ]);
        let messages = collect_fetches(data);
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.uid, Uid::new(8).unwrap());
        assert!(message.flags.as_ref().unwrap().contains(&Flag::Seen));

        let summary = message.envelope_summary().unwrap();
        assert_eq!(summary.subject.as_deref(), Some("hi"));
        assert_eq!(summary.message_id.as_deref(), Some("a@example.org"));
    }

    #[test]
    fn unsolicited_fetch_without_uid_dropped() {
        let data = untagged(&[b"* 1 FETCH (FLAGS (\\Deleted))\r\n", b"* 2 FETCH (UID 5 RFC822.SIZE 10)\r\n"]);
        let messages = collect_fetches(data);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].size, Some(10));
    }

    #[test]
    fn repeated_uid_merges() {
        let data = untagged(&[
            b"* 3 FETCH (UID 9 FLAGS (\\Seen))\r\n",
            b"* 3 FETCH (UID 9 MODSEQ (12))\r\n",
        ]);
        let messages = collect_fetches(data);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].flags.is_some());
        assert_eq!(messages[0].modseq, Some(12));
    }

    #[test]
    fn search_with_modseq() {
        let result = SearchResult::from_untagged(untagged(&[b"* SEARCH 2 5 9 (MODSEQ 917162500)\r\n"]));
        assert_eq!(result.uids.len(), 3);
        assert_eq!(result.modseq, Some(917_162_500));
    }

    #[test]
    fn changed_since_splits_vanished() {
        let result = ChangedSince::from_untagged(untagged(&[
            b"* VANISHED (EARLIER) 300:302,405\r\n",
            b"* 1 FETCH (UID 4 FLAGS () MODSEQ (20))\r\n",
        ]));
        assert_eq!(result.messages.len(), 1);
        let vanished = result.vanished.unwrap();
        assert_eq!(vanished.expand().len(), 4);
        assert!(vanished.contains(Uid::new(405).unwrap()));
    }

    #[test]
    fn changed_since_without_vanished() {
        let result = ChangedSince::from_untagged(Vec::new());
        assert!(result.vanished.is_none());
        assert!(result.messages.is_empty());
    }
}
