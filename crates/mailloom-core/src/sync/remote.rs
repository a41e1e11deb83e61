//! The remote side of synchronization.
//!
//! [`RemoteMailbox`] is the narrow view of an IMAP account the sync engine
//! needs. [`ImapRemote`] implements it over a [`SessionHandle`]; tests use
//! an in-memory implementation.

use std::future::Future;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use mailloom_imap::session::FetchedMessage;
use mailloom_imap::{
    FetchAttribute, Flags, SearchCriteria, SessionEvent, SessionHandle, SpecialUse, Uid, UidSet,
};
use tokio::sync::broadcast;

use crate::Result;
use crate::store::NewMessage;

/// Header fields fetched for every new message.
const SUMMARY_HEADERS: &[&str] = &[
    "DATE",
    "SUBJECT",
    "FROM",
    "TO",
    "CC",
    "MESSAGE-ID",
    "IN-REPLY-TO",
    "REFERENCES",
    "CONTENT-TYPE",
];

/// A listed mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolderInfo {
    /// Mailbox path.
    pub path: String,
    /// Role advertised by the server.
    pub special_use: Option<SpecialUse>,
}

/// State of a mailbox right after it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFolder {
    /// UIDVALIDITY.
    pub uid_validity: u32,
    /// Predicted next UID.
    pub uid_next: Option<u32>,
    /// HIGHESTMODSEQ; `None` without CONDSTORE.
    pub highest_modseq: Option<u64>,
    /// Message count.
    pub exists: u32,
    /// `VANISHED` reporting is available.
    pub qresync: bool,
}

/// Current flags of a remote message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFlags {
    /// UID.
    pub uid: u32,
    /// Flags.
    pub flags: Flags,
    /// Mod-sequence, with CONDSTORE.
    pub modseq: Option<u64>,
}

/// Answer to a `CHANGEDSINCE` fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteChanges {
    /// Messages whose flags changed.
    pub changed: Vec<RemoteFlags>,
    /// Expunged UIDs, when they were asked for.
    pub vanished: Option<Vec<u32>>,
}

/// UID search in the open mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidQuery {
    /// Only UIDs above this one.
    pub after: u32,
    /// Only UIDs up to this one.
    pub through: Option<u32>,
    /// Only messages received on or after this day.
    pub since: Option<NaiveDate>,
}

impl UidQuery {
    /// Whether `uid` lies in the queried range.
    #[must_use]
    pub fn covers(&self, uid: u32) -> bool {
        uid > self.after && self.through.is_none_or(|through| uid <= through)
    }
}

/// What the sync engine needs from the server.
///
/// Every method except [`Self::list_folders`], [`Self::select`],
/// [`Self::fetch_body`] and the watch calls works on the mailbox opened by
/// the last [`Self::select`]. Callers serialize access.
pub trait RemoteMailbox: Send + Sync + 'static {
    /// Lists selectable mailboxes.
    fn list_folders(&self) -> impl Future<Output = Result<Vec<RemoteFolderInfo>>> + Send;

    /// Opens a mailbox read-only.
    fn select(&self, path: &str) -> impl Future<Output = Result<RemoteFolder>> + Send;

    /// UIDs matching `query`, ascending.
    fn search_uids(&self, query: UidQuery) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Flags of every message with a UID up to `through`.
    fn fetch_flags(&self, through: u32) -> impl Future<Output = Result<Vec<RemoteFlags>>> + Send;

    /// Flag changes since `modseq` among UIDs up to `through`, with
    /// expunged UIDs when `vanished` is set.
    fn fetch_changed_since(
        &self,
        through: u32,
        modseq: u64,
        vanished: bool,
    ) -> impl Future<Output = Result<RemoteChanges>> + Send;

    /// Flags and header summaries of the given UIDs. UIDs that no longer
    /// exist are skipped.
    fn fetch_headers(&self, uids: &[u32]) -> impl Future<Output = Result<Vec<NewMessage>>> + Send;

    /// Whole raw message, `None` if it no longer exists.
    fn fetch_body(&self, path: &str, uid: u32) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Unsolicited mailbox changes.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Starts watching `path` for changes between requests.
    fn watch(&self, _path: &str) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Ends a run of requests; watching resumes.
    fn release(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Closes the connection.
    fn logout(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// [`RemoteMailbox`] over an IMAP session.
#[derive(Debug)]
pub struct ImapRemote {
    handle: SessionHandle,
    watched: Mutex<Option<String>>,
    /// Watching was interrupted by a request and must be resumed.
    paused: AtomicBool,
    condstore: AtomicBool,
}

impl ImapRemote {
    /// Wraps a session.
    #[must_use]
    pub const fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            watched: Mutex::new(None),
            paused: AtomicBool::new(false),
            condstore: AtomicBool::new(false),
        }
    }

    /// The underlying session.
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    fn watched(&self) -> Option<String> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn flag_items(&self) -> Vec<FetchAttribute> {
        let mut items = vec![FetchAttribute::Flags];
        if self.condstore.load(Ordering::Relaxed) {
            items.push(FetchAttribute::ModSeq);
        }
        items
    }
}

impl RemoteMailbox for ImapRemote {
    async fn list_folders(&self) -> Result<Vec<RemoteFolderInfo>> {
        let listed = self.handle.list("", "*").await?;
        Ok(listed
            .into_iter()
            .filter(mailloom_imap::ListResponse::is_selectable)
            .map(|entry| RemoteFolderInfo {
                special_use: entry.special_use(),
                path: entry.mailbox.as_str().to_string(),
            })
            .collect())
    }

    async fn select(&self, path: &str) -> Result<RemoteFolder> {
        // While a mailbox is watched the session keeps returning to it, so
        // watching pauses until `release`.
        if self.watched().is_some() && !self.paused.swap(true, Ordering::AcqRel) {
            self.handle.stop_idle().await?;
        }
        let selected = self.handle.examine(path).await?;
        let condstore = selected.highest_modseq.is_some() && !selected.no_modseq;
        self.condstore.store(condstore, Ordering::Relaxed);
        let uid_validity = selected.uid_validity.map_or(0, |v| v.get());
        Ok(RemoteFolder {
            uid_validity,
            uid_next: selected.uid_next.map(Uid::get),
            highest_modseq: selected.highest_modseq.filter(|_| condstore),
            exists: selected.exists,
            qresync: selected.qresync && condstore,
        })
    }

    async fn search_uids(&self, query: UidQuery) -> Result<Vec<u32>> {
        let Some(start) = Uid::new(query.after.saturating_add(1)) else {
            return Ok(Vec::new());
        };
        let range = match query.through.and_then(Uid::new) {
            Some(end) if end < start => return Ok(Vec::new()),
            Some(end) => UidSet::range(start, end),
            None => UidSet::from_start(start),
        };
        let mut criteria = vec![SearchCriteria::Uid(range)];
        if let Some(since) = query.since {
            criteria.push(SearchCriteria::Since(since.format("%-d-%b-%Y").to_string()));
        }
        let found = self.handle.uid_search(SearchCriteria::And(criteria)).await?;
        // `n:*` always matches the highest UID, even below n.
        let mut uids: Vec<u32> = found.uids.into_iter().map(Uid::get).filter(|&uid| query.covers(uid)).collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    async fn fetch_flags(&self, through: u32) -> Result<Vec<RemoteFlags>> {
        let (Some(first), Some(last)) = (Uid::new(1), Uid::new(through)) else {
            return Ok(Vec::new());
        };
        let fetched = self.handle.uid_fetch(&UidSet::range(first, last), self.flag_items()).await?;
        Ok(fetched.into_iter().filter(|m| m.uid <= last).map(remote_flags).collect())
    }

    async fn fetch_changed_since(&self, through: u32, modseq: u64, vanished: bool) -> Result<RemoteChanges> {
        let (Some(first), Some(last)) = (Uid::new(1), Uid::new(through)) else {
            return Ok(RemoteChanges {
                changed: Vec::new(),
                vanished: vanished.then(Vec::new),
            });
        };
        let changes = self
            .handle
            .uid_fetch_changed_since(&UidSet::range(first, last), self.flag_items(), modseq, vanished)
            .await?;
        Ok(RemoteChanges {
            changed: changes
                .messages
                .into_iter()
                .filter(|m| m.uid <= last)
                .map(remote_flags)
                .collect(),
            vanished: vanished.then(|| {
                changes
                    .vanished
                    .map(|set| set.expand().into_iter().map(Uid::get).collect())
                    .unwrap_or_default()
            }),
        })
    }

    async fn fetch_headers(&self, uids: &[u32]) -> Result<Vec<NewMessage>> {
        let set = UidSet::from_uids(uids.iter().copied().filter_map(Uid::new));
        let mut items = self.flag_items();
        items.extend([
            FetchAttribute::Rfc822Size,
            FetchAttribute::InternalDate,
            FetchAttribute::header_fields(SUMMARY_HEADERS),
        ]);
        let fetched = self.handle.uid_fetch(&set, items).await?;
        let mut messages: Vec<NewMessage> = fetched
            .into_iter()
            .filter(|m| uids.contains(&m.uid.get()))
            .map(new_message)
            .collect();
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn fetch_body(&self, path: &str, uid: u32) -> Result<Option<Vec<u8>>> {
        let Some(uid) = Uid::new(uid) else {
            return Ok(None);
        };
        self.select(path).await?;
        let fetched = self
            .handle
            .uid_fetch(&UidSet::single(uid), vec![FetchAttribute::full_body()])
            .await?;
        Ok(fetched.into_iter().find(|m| m.uid == uid).and_then(|m| m.body))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.handle.subscribe()
    }

    async fn watch(&self, path: &str) -> Result<()> {
        *self.watched.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.to_string());
        self.paused.store(false, Ordering::Release);
        self.handle.start_idle(path).await?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if let Some(path) = self.watched()
            && self.paused.swap(false, Ordering::AcqRel)
        {
            self.handle.start_idle(&path).await?;
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.handle.logout().await?;
        Ok(())
    }
}

fn remote_flags(message: FetchedMessage) -> RemoteFlags {
    RemoteFlags {
        uid: message.uid.get(),
        flags: message.flags.unwrap_or_default(),
        modseq: message.modseq,
    }
}

fn new_message(message: FetchedMessage) -> NewMessage {
    let mut envelope = message.envelope_summary().unwrap_or_default();
    if envelope.date.is_none() {
        envelope.date = message.internal_date.as_deref().and_then(parse_internal_date);
    }
    NewMessage {
        uid: message.uid.get(),
        modseq: message.modseq,
        flags: message.flags.unwrap_or_default(),
        size: message.size,
        envelope,
    }
}

/// Parses an INTERNALDATE such as ` 7-Jul-2024 09:15:00 +0200`.
fn parse_internal_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|date| date.with_timezone(&Utc))
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
    fn query_range() {
        let open = UidQuery {
            after: 10,
            ..UidQuery::default()
        };
        assert!(!open.covers(10));
        assert!(open.covers(11));
        assert!(open.covers(u32::MAX));

        let closed = UidQuery {
            after: 0,
            through: Some(5),
            since: None,
        };
        assert!(closed.covers(1));
        assert!(closed.covers(5));
        assert!(!closed.covers(6));
    }

    #[test]
    fn internal_dates() {
        let date = parse_internal_date(" 7-Jul-2024 09:15:00 +0200").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-07-07T07:15:00+00:00");
        assert!(parse_internal_date("yesterday").is_none());
    }

    #[test]
    fn header_only_fetch_becomes_a_record() {
        let fetched = FetchedMessage {
            seq: mailloom_imap::SeqNum::new(3).unwrap(),
            uid: Uid::new(42).unwrap(),
            flags: Some(Flags::parse_list("\\Seen")),
            modseq: Some(9),
            size: Some(2048),
            internal_date: Some("01-Feb-2024 10:00:00 +0000".to_string()),
            header: Some(
                b"Subject: Re: Plan\r\nFrom: Alice <alice@example.com>\r\nMessage-ID: <b@x>\r\nIn-Reply-To: <a@x>\r\n\r\n"
                    .to_vec(),
            ),
            body: None,
            envelope: None,
        };
        let message = new_message(fetched);
        assert_eq!(message.uid, 42);
        assert_eq!(message.envelope.subject.as_deref(), Some("Re: Plan"));
        assert_eq!(message.envelope.message_id.as_deref(), Some("b@x"));
        assert_eq!(message.envelope.in_reply_to, vec!["a@x"]);
        assert_eq!(message.envelope.date.unwrap().to_rfc3339(), "2024-02-01T10:00:00+00:00");
        assert!(message.flags.is_seen());
    }
}
