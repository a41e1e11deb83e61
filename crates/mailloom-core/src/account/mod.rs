//! A running mail account.
//!
//! [`Account`] ties one account's store, sync engine, conversation index
//! and submitter together and drives them from session events and a poll
//! timer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mailloom_imap::session::{Credentials as ImapCredentials, TcpConnector};
use mailloom_imap::{SessionConfig, SessionEvent, SessionHandle};
use mailloom_mime::{ComposedMessage, Mailbox, Message, MessageBuilder};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::config::{AccountConfig, SyncSettings, validate_account};
use crate::conversation::{ConversationFeed, ConversationSummary, Conversations};
use crate::store::{Folder, MessageKey, MessageRecord, SearchHit, Store};
use crate::submit::{SmtpConnector, Submission, Submitter, TcpSmtpConnector};
use crate::sync::{
    CancelHandle, CancelSignal, ImapRemote, RemoteMailbox, SyncEngine, SyncEvent, SyncOutcome,
    SyncScheduler,
};
use crate::{Error, Result};

/// The mailbox watched between syncs.
const INBOX: &str = "INBOX";

/// One configured account with its background machinery.
#[derive(Debug)]
pub struct Account<R = ImapRemote, C = TcpSmtpConnector> {
    name: String,
    sender: Mailbox,
    settings: SyncSettings,
    store: Store,
    conversations: Arc<Conversations>,
    scheduler: SyncScheduler<R>,
    submitter: Submitter<C>,
    cancel: CancelHandle,
}

impl Account {
    /// Opens the store at `store_path` and starts an IMAP session for
    /// `config`. The session connects in the background.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid account, or a store error.
    pub async fn open(config: &AccountConfig, store_path: &Path) -> Result<Self> {
        validate_account(config)?;
        let store = Store::open(store_path).await?;
        let connector = TcpConnector::new(
            config.imap.imap_config(),
            ImapCredentials::new(&config.credentials.username, &config.credentials.password),
        );
        let session = SessionHandle::spawn(connector, SessionConfig::default().backoff(config.retry.backoff()));
        tracing::info!(account = %config.name, host = %config.imap.host, "account opened");
        Self::with_parts(config, store, ImapRemote::new(session), Submitter::for_account(config)).await
    }
}

impl<R: RemoteMailbox, C: SmtpConnector> Account<R, C> {
    /// Assembles an account from its parts. The conversation index is
    /// built from what `store` already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn with_parts(config: &AccountConfig, store: Store, remote: R, submitter: Submitter<C>) -> Result<Self> {
        let conversations = Arc::new(Conversations::new(store.link_fields().await?));
        let (cancel, signal) = CancelSignal::pair();
        let engine = SyncEngine::new(
            Arc::new(remote),
            store.clone(),
            Arc::clone(&conversations),
            config.sync.clone(),
        );
        let mut sender = Mailbox::new(&config.address);
        if let Some(name) = &config.display_name {
            sender = sender.with_name(name);
        }
        Ok(Self {
            name: config.name.clone(),
            sender,
            settings: config.sync.clone(),
            store,
            conversations,
            scheduler: SyncScheduler::new(Arc::new(engine), signal),
            submitter,
            cancel,
        })
    }

    /// Account name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Live conversation state.
    #[must_use]
    pub const fn conversations(&self) -> &Arc<Conversations> {
        &self.conversations
    }

    /// The server side.
    #[must_use]
    pub fn remote(&self) -> &Arc<R> {
        self.engine().remote()
    }

    fn engine(&self) -> &SyncEngine<R> {
        self.scheduler.engine()
    }

    /// Commit notifications from the sync engine.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine().subscribe()
    }

    /// Refreshes the folder list from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or a store write fails.
    pub async fn refresh_folders(&self) -> Result<Vec<Folder>> {
        self.engine().refresh_folders().await
    }

    /// Folders known locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn folders(&self) -> Result<Vec<Folder>> {
        self.store.folders().await
    }

    /// Syncs one folder and waits for it. Joins a run already in
    /// progress for the folder.
    pub async fn sync_folder(&self, path: &str) -> SyncOutcome {
        self.scheduler.sync(path).await
    }

    /// Syncs every configured folder (every known folder when none are
    /// configured) and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder list cannot be read. Failures of
    /// single folders are reported per folder.
    pub async fn sync_all(&self) -> Result<Vec<(String, SyncOutcome)>> {
        let targets = self.sync_targets().await?;
        let pending: Vec<_> = targets
            .into_iter()
            .map(|path| {
                let completion = self.scheduler.trigger(&path);
                (path, completion)
            })
            .collect();
        let mut outcomes = Vec::with_capacity(pending.len());
        for (path, completion) in pending {
            outcomes.push((path, completion.wait().await));
        }
        Ok(outcomes)
    }

    /// Requests a sync of every target folder without waiting.
    async fn trigger_all(&self) {
        match self.sync_targets().await {
            Ok(targets) => {
                for path in targets {
                    self.scheduler.trigger(&path);
                }
            }
            Err(error) => tracing::warn!(account = %self.name, %error, "cannot list folders to sync"),
        }
    }

    async fn sync_targets(&self) -> Result<Vec<String>> {
        if !self.settings.folders.is_empty() {
            return Ok(self.settings.folders.clone());
        }
        Ok(self.store.folders().await?.into_iter().map(|f| f.path).collect())
    }

    async fn folder(&self, path: &str) -> Result<Folder> {
        self.store
            .folder(path)
            .await?
            .ok_or_else(|| Error::UnknownFolder(path.to_string()))
    }

    /// Conversations of a folder, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFolder`] if the folder is not in the store.
    pub async fn conversations_in(&self, path: &str) -> Result<Vec<ConversationSummary>> {
        let folder = self.folder(path).await?;
        Ok(self.conversations.in_folder(folder.id).await)
    }

    /// Live conversation listing of a folder.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFolder`] if the folder is not in the store.
    pub async fn subscribe_conversations(&self, path: &str) -> Result<ConversationFeed> {
        let folder = self.folder(path).await?;
        Ok(self.conversations.subscribe(folder.id))
    }

    /// Cached metadata of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn message(&self, key: MessageKey) -> Result<Option<MessageRecord>> {
        self.store.message(key).await
    }

    /// Raw message, fetched and cached on first use.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMessage`] if the message exists on neither side.
    pub async fn message_body(&self, key: MessageKey) -> Result<Vec<u8>> {
        self.engine().message_body(key).await
    }

    /// Parsed message.
    ///
    /// # Errors
    ///
    /// As [`Self::message_body`], or [`Error::Protocol`] if the message
    /// cannot be parsed.
    pub async fn open_message(&self, key: MessageKey) -> Result<Message> {
        let raw = self.message_body(key).await?;
        Message::parse(&raw).map_err(|err| Error::Protocol(format!("message {}/{}: {err}", key.folder, key.uid)))
    }

    /// Full-text search over cached headers and bodies, optionally within
    /// one folder.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFolder`] for an unknown folder, or a store error.
    pub async fn search(&self, query: &str, folder: Option<&str>, limit: u32) -> Result<Vec<SearchHit>> {
        let folder = match folder {
            Some(path) => Some(self.folder(path).await?.id),
            None => None,
        };
        self.store.search(query, folder, limit).await
    }

    /// A message builder with this account as sender.
    #[must_use]
    pub fn compose(&self) -> MessageBuilder {
        MessageBuilder::new().from(self.sender.clone())
    }

    /// Submits a composed message.
    ///
    /// # Errors
    ///
    /// [`Error::DeliveryFailure`] for a permanent rejection; the last
    /// transient error once retries run out.
    pub async fn send(&self, message: &ComposedMessage) -> Result<Submission> {
        self.submitter.submit(message).await
    }

    /// Keeps the account in sync until `shutdown` turns true.
    ///
    /// Syncs everything once, then re-syncs a folder whenever the session
    /// reports a change in it, everything after a reconnect, and
    /// everything on each poll tick. On return running syncs are
    /// cancelled and the session is logged out; the account does not sync
    /// again afterwards. Failures of single syncs are logged.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let remote = self.engine().remote();
        let mut session_events = remote.subscribe();

        if let Err(error) = self.refresh_folders().await {
            tracing::warn!(account = %self.name, %error, "initial folder refresh failed");
        }
        self.trigger_all().await;
        if self.settings.idle
            && let Err(error) = remote.watch(INBOX).await
        {
            tracing::warn!(account = %self.name, %error, "cannot watch inbox");
        }

        let mut poll = tokio::time::interval(self.settings.poll_interval().max(Duration::from_secs(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    tracing::debug!(account = %self.name, "poll");
                    self.trigger_all().await;
                }
                event = session_events.recv() => match event {
                    Ok(SessionEvent::Reconnected) => {
                        tracing::info!(account = %self.name, "session reconnected; resyncing");
                        self.trigger_all().await;
                    }
                    Ok(event) => {
                        if let Some(mailbox) = event.mailbox() {
                            tracing::debug!(account = %self.name, mailbox, "change reported");
                            self.scheduler.trigger(mailbox);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(account = %self.name, missed, "session events lagged");
                        self.trigger_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!(account = %self.name, "session ended");
                        break;
                    }
                },
            }
        }

        self.stop().await;
        tracing::info!(account = %self.name, "account stopped");
    }

    /// Stops the account and deletes its local store, including the
    /// database's `-wal` and `-shm` files. The server is not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store files cannot be deleted.
    pub async fn remove(self) -> Result<()> {
        self.stop().await;
        let name = self.name;
        self.store.destroy().await?;
        tracing::info!(account = %name, "account removed");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        if let Err(error) = self.engine().remote().logout().await {
            tracing::debug!(account = %self.name, %error, "logout failed");
        }
    }
}
