//! An in-memory IMAP account for engine tests.
//!
//! [`FakeRemote`] keeps folders, UIDs, flags and mod-sequences the way a
//! server would, and can be told to fail or cancel at a chosen header
//! fetch.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mailloom_core::config::{AccountConfig, Endpoint, RetrySettings, SyncSettings};
use mailloom_core::store::NewMessage;
use mailloom_core::submit::SmtpConnector;
use mailloom_core::sync::{
    CancelHandle, RemoteChanges, RemoteFlags, RemoteFolder, RemoteFolderInfo, RemoteMailbox, UidQuery,
};
use mailloom_core::{Error, Result};
use mailloom_imap::{Flags, SessionEvent, SpecialUse};
use mailloom_mime::{Envelope, Mailbox};
use mailloom_smtp::{Client, Connected};
use tokio::sync::broadcast;

/// Base of the `Date` header of every fake message; UID `n` is `n`
/// minutes later.
pub const EPOCH: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub flags: Flags,
    pub modseq: u64,
    pub envelope: Envelope,
}

impl FakeMessage {
    /// Raw RFC 5322 form, as a body fetch returns it.
    pub fn raw(&self) -> Vec<u8> {
        let mut text = String::new();
        if let Some(id) = &self.envelope.message_id {
            text.push_str(&format!("Message-ID: <{id}>\r\n"));
        }
        if let Some(subject) = &self.envelope.subject {
            text.push_str(&format!("Subject: {subject}\r\n"));
        }
        text.push_str("Content-Type: text/plain\r\n\r\n");
        text.push_str("Body of ");
        text.push_str(self.envelope.subject.as_deref().unwrap_or("nothing"));
        text.push_str("\r\n");
        text.into_bytes()
    }
}

#[derive(Debug, Default)]
struct FakeFolder {
    uid_validity: u32,
    uid_next: u32,
    highest_modseq: u64,
    messages: BTreeMap<u32, FakeMessage>,
    /// Expunged UIDs with the mod-sequence of their removal.
    vanished: Vec<(u64, u32)>,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, FakeFolder>,
    selected: Option<String>,
    condstore: bool,
    qresync: bool,
    selects: usize,
    flag_fetches: usize,
    header_fetches: usize,
    body_fetches: usize,
    fail_header_fetch: Option<usize>,
    cancel_after_header_fetch: Option<(usize, CancelHandle)>,
}

/// In-memory server state behind the [`RemoteMailbox`] trait.
#[derive(Debug)]
pub struct FakeRemote {
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            events: broadcast::channel(64).0,
        }
    }

    /// Advertises CONDSTORE, and QRESYNC when `qresync` is set.
    pub fn with_condstore(self, qresync: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.condstore = true;
            state.qresync = qresync;
        }
        self
    }

    pub fn create_folder(&self, path: &str, uid_validity: u32) {
        self.state.lock().unwrap().folders.insert(
            path.to_string(),
            FakeFolder {
                uid_validity,
                uid_next: 1,
                highest_modseq: 1,
                ..FakeFolder::default()
            },
        );
    }

    pub fn delete_folder(&self, path: &str) {
        self.state.lock().unwrap().folders.remove(path);
    }

    /// Appends a message and returns its UID.
    pub fn deliver(&self, path: &str, subject: &str, message_id: &str, references: &[&str]) -> u32 {
        let mut state = self.state.lock().unwrap();
        let folder = state.folders.get_mut(path).unwrap();
        let uid = folder.uid_next;
        folder.uid_next += 1;
        folder.highest_modseq += 1;
        let envelope = Envelope {
            subject: Some(subject.to_string()),
            from: vec![Mailbox::new("alice@example.com").with_name("Alice")],
            to: vec![Mailbox::new("bob@example.com")],
            date: DateTime::<Utc>::from_timestamp(EPOCH + i64::from(uid) * 60, 0),
            message_id: Some(message_id.to_string()),
            references: references.iter().map(|r| (*r).to_string()).collect(),
            ..Envelope::default()
        };
        folder.messages.insert(
            uid,
            FakeMessage {
                flags: Flags::default(),
                modseq: folder.highest_modseq,
                envelope,
            },
        );
        uid
    }

    /// Delivers `count` unrelated messages.
    pub fn deliver_many(&self, path: &str, count: u32) -> Vec<u32> {
        (0..count)
            .map(|_| {
                let n = self.state.lock().unwrap().folders[path].uid_next;
                self.deliver(path, &format!("Message {n}"), &format!("{n}.{path}@example.com"), &[])
            })
            .collect()
    }

    pub fn set_flags(&self, path: &str, uid: u32, flags: &str) {
        let mut state = self.state.lock().unwrap();
        let folder = state.folders.get_mut(path).unwrap();
        folder.highest_modseq += 1;
        let modseq = folder.highest_modseq;
        let message = folder.messages.get_mut(&uid).unwrap();
        message.flags = Flags::parse_list(flags);
        message.modseq = modseq;
    }

    pub fn expunge(&self, path: &str, uid: u32) {
        let mut state = self.state.lock().unwrap();
        let folder = state.folders.get_mut(path).unwrap();
        folder.highest_modseq += 1;
        folder.messages.remove(&uid);
        folder.vanished.push((folder.highest_modseq, uid));
    }

    /// Renumbers a folder under a new UIDVALIDITY, as after a server-side
    /// rebuild.
    pub fn renumber(&self, path: &str, uid_validity: u32) {
        let mut state = self.state.lock().unwrap();
        let folder = state.folders.get_mut(path).unwrap();
        let messages: Vec<FakeMessage> = std::mem::take(&mut folder.messages).into_values().collect();
        folder.uid_validity = uid_validity;
        folder.vanished.clear();
        folder.uid_next = 1;
        for message in messages {
            folder.messages.insert(folder.uid_next, message);
            folder.uid_next += 1;
        }
    }

    /// Makes the `n`th header fetch from now fail (0 is the next one).
    pub fn fail_header_fetch(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_header_fetch = Some(state.header_fetches + n);
    }

    /// Cancels `handle` right after the `n`th header fetch from now
    /// returns.
    pub fn cancel_after_header_fetch(&self, n: usize, handle: CancelHandle) {
        let mut state = self.state.lock().unwrap();
        state.cancel_after_header_fetch = Some((state.header_fetches + n, handle));
    }

    pub fn uids(&self, path: &str) -> Vec<u32> {
        self.state.lock().unwrap().folders[path].messages.keys().copied().collect()
    }

    pub fn selects(&self) -> usize {
        self.state.lock().unwrap().selects
    }

    pub fn flag_fetches(&self) -> usize {
        self.state.lock().unwrap().flag_fetches
    }

    pub fn header_fetches(&self) -> usize {
        self.state.lock().unwrap().header_fetches
    }

    pub fn body_fetches(&self) -> usize {
        self.state.lock().unwrap().body_fetches
    }

    /// Publishes a session event, as the IMAP session does while idling.
    pub fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn flags_of(&self, uid: u32, message: &FakeMessage, condstore: bool) -> RemoteFlags {
        RemoteFlags {
            uid,
            flags: message.flags.clone(),
            modseq: condstore.then_some(message.modseq),
        }
    }
}

fn selected(state: &State) -> Result<&FakeFolder> {
    state
        .selected
        .as_ref()
        .and_then(|path| state.folders.get(path))
        .ok_or_else(|| Error::CommandFailure("NO no mailbox selected".to_string()))
}

impl RemoteMailbox for FakeRemote {
    async fn list_folders(&self) -> Result<Vec<RemoteFolderInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .folders
            .keys()
            .map(|path| RemoteFolderInfo {
                path: path.clone(),
                special_use: (path == "INBOX").then_some(SpecialUse::Inbox),
            })
            .collect())
    }

    async fn select(&self, path: &str) -> Result<RemoteFolder> {
        let mut state = self.state.lock().unwrap();
        state.selects += 1;
        let condstore = state.condstore;
        let qresync = state.qresync;
        let Some(folder) = state.folders.get(path) else {
            return Err(Error::CommandFailure(format!("NO no such mailbox {path}")));
        };
        let info = RemoteFolder {
            uid_validity: folder.uid_validity,
            uid_next: Some(folder.uid_next),
            highest_modseq: condstore.then_some(folder.highest_modseq),
            exists: u32::try_from(folder.messages.len()).unwrap(),
            qresync: condstore && qresync,
        };
        state.selected = Some(path.to_string());
        Ok(info)
    }

    async fn search_uids(&self, query: UidQuery) -> Result<Vec<u32>> {
        let state = self.state.lock().unwrap();
        let folder = selected(&state)?;
        Ok(folder
            .messages
            .iter()
            .filter(|(uid, message)| {
                query.covers(**uid)
                    && query.since.is_none_or(|since| {
                        message.envelope.date.is_none_or(|date| date.date_naive() >= since)
                    })
            })
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn fetch_flags(&self, through: u32) -> Result<Vec<RemoteFlags>> {
        let mut state = self.state.lock().unwrap();
        state.flag_fetches += 1;
        let condstore = state.condstore;
        let folder = selected(&state)?;
        Ok(folder
            .messages
            .range(..=through)
            .map(|(uid, message)| self.flags_of(*uid, message, condstore))
            .collect())
    }

    async fn fetch_changed_since(&self, through: u32, modseq: u64, vanished: bool) -> Result<RemoteChanges> {
        let mut state = self.state.lock().unwrap();
        state.flag_fetches += 1;
        let folder = selected(&state)?;
        Ok(RemoteChanges {
            changed: folder
                .messages
                .range(..=through)
                .filter(|(_, message)| message.modseq > modseq)
                .map(|(uid, message)| self.flags_of(*uid, message, true))
                .collect(),
            vanished: vanished.then(|| {
                folder
                    .vanished
                    .iter()
                    .filter(|(at, uid)| *at > modseq && *uid <= through)
                    .map(|(_, uid)| *uid)
                    .collect()
            }),
        })
    }

    async fn fetch_headers(&self, uids: &[u32]) -> Result<Vec<NewMessage>> {
        let mut state = self.state.lock().unwrap();
        let fetch = state.header_fetches;
        state.header_fetches += 1;
        if state.fail_header_fetch == Some(fetch) {
            state.fail_header_fetch = None;
            return Err(Error::ConnectionLost("connection reset by peer".to_string()));
        }
        if let Some((at, _)) = &state.cancel_after_header_fetch
            && *at == fetch
            && let Some((_, handle)) = state.cancel_after_header_fetch.take()
        {
            handle.cancel();
        }
        let condstore = state.condstore;
        let folder = selected(&state)?;
        Ok(uids
            .iter()
            .filter_map(|uid| {
                let message = folder.messages.get(uid)?;
                Some(NewMessage {
                    uid: *uid,
                    modseq: condstore.then_some(message.modseq),
                    flags: message.flags.clone(),
                    size: Some(u32::try_from(message.raw().len()).unwrap()),
                    envelope: message.envelope.clone(),
                })
            })
            .collect())
    }

    async fn fetch_body(&self, path: &str, uid: u32) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        state.body_fetches += 1;
        let folder = state
            .folders
            .get(path)
            .ok_or_else(|| Error::CommandFailure(format!("NO no such mailbox {path}")))?;
        Ok(folder.messages.get(&uid).map(FakeMessage::raw))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// A submission server that is never reachable.
#[derive(Debug)]
pub struct Unreachable;

impl SmtpConnector for Unreachable {
    type Stream = tokio::io::DuplexStream;

    async fn connect(&self) -> mailloom_smtp::Result<Client<Self::Stream, Connected>> {
        Err(mailloom_smtp::Error::ConnectionClosed)
    }
}

/// Account settings for tests: no retries worth waiting for.
pub fn account_config(sync: SyncSettings) -> AccountConfig {
    AccountConfig {
        name: "test".to_string(),
        address: "bob@example.com".to_string(),
        display_name: Some("Bob".to_string()),
        imap: Endpoint {
            host: "imap.example.com".to_string(),
            port: 993,
            ..Endpoint::default()
        },
        smtp: Endpoint {
            host: "smtp.example.com".to_string(),
            port: 465,
            ..Endpoint::default()
        },
        sync,
        retry: RetrySettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        ..AccountConfig::default()
    }
}

pub fn settings(batch_size: usize) -> SyncSettings {
    SyncSettings {
        batch_size,
        idle: false,
        ..SyncSettings::default()
    }
}
