//! Account-level behaviour: conversations, search, submission and the
//! event loop.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::{FakeRemote, Unreachable, account_config, settings};
use mailloom_core::store::{MessageKey, Store};
use mailloom_core::submit::Submitter;
use mailloom_core::{Account, Error, SyncEvent};
use mailloom_imap::SessionEvent;
use mailloom_mime::Mailbox;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

type TestAccount = Account<FakeRemote, Unreachable>;

async fn open_with(store: Store, remote: FakeRemote) -> TestAccount {
    let config = account_config(settings(50));
    let submitter = Submitter::new(Unreachable, None, config.retry);
    Account::with_parts(&config, store, remote, submitter).await.unwrap()
}

async fn open(remote: FakeRemote) -> TestAccount {
    open_with(Store::in_memory().await.unwrap(), remote).await
}

/// An inbox with a plan discussed under two subjects and one unrelated
/// message.
fn planning_inbox() -> FakeRemote {
    let remote = FakeRemote::new();
    remote.create_folder("INBOX", 1);
    remote.deliver("INBOX", "Project plan", "a@example.com", &[]);
    remote.deliver("INBOX", "Re: Project plan", "b@example.com", &[]);
    remote.deliver("INBOX", "Lunch?", "c@example.com", &["a@example.com"]);
    remote.deliver("INBOX", "Unrelated", "d@example.com", &[]);
    remote
}

async fn next_change(events: &mut broadcast::Receiver<SyncEvent>) -> usize {
    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            SyncEvent::FolderChanged { inserted, .. } => return inserted,
            SyncEvent::FolderReset { .. } => {}
        }
    }
}

mod conversation_tests {
    use super::*;

    #[tokio::test]
    async fn subjects_and_references_group_messages() {
        let account = open(planning_inbox()).await;
        account.refresh_folders().await.unwrap();
        account.sync_folder("INBOX").await.unwrap();
        let inbox = account.store().folder("INBOX").await.unwrap().unwrap();
        let key = |uid| MessageKey::new(inbox.id, uid);

        let listing = account.conversations_in("INBOX").await.unwrap();
        assert_eq!(listing.len(), 2);
        // Newest first: the unrelated message arrived last.
        assert_eq!(listing[0].members, vec![key(4)]);
        assert_eq!(listing[1].members, vec![key(1), key(2), key(3)]);
        assert_eq!(listing[1].subject.as_deref(), Some("Project plan"));

        let thread = account.conversations().thread_of(key(3)).await;
        assert_eq!(thread, vec![key(1), key(2), key(3)]);
    }

    #[tokio::test]
    async fn index_is_rebuilt_from_the_store() {
        let store = Store::in_memory().await.unwrap();
        let account = open_with(store.clone(), planning_inbox()).await;
        account.sync_folder("INBOX").await.unwrap();
        let before = account.conversations_in("INBOX").await.unwrap();

        let reopened = open_with(store, FakeRemote::new()).await;
        let after = reopened.conversations_in("INBOX").await.unwrap();
        let members = |listing: &[mailloom_core::ConversationSummary]| {
            listing.iter().map(|c| c.members.clone()).collect::<Vec<_>>()
        };
        assert_eq!(members(&after), members(&before));
    }

    #[tokio::test]
    async fn replies_in_other_folders_join() {
        let remote = planning_inbox();
        remote.create_folder("Sent", 1);
        remote.deliver("Sent", "Re: Lunch?", "e@example.com", &["c@example.com"]);
        let account = open(remote).await;
        account.sync_folder("INBOX").await.unwrap();
        account.sync_folder("Sent").await.unwrap();

        let sent = account.conversations_in("Sent").await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].members.len(), 4);
    }

    #[tokio::test]
    async fn feed_follows_commits() {
        let remote = FakeRemote::new();
        remote.create_folder("INBOX", 1);
        remote.deliver("INBOX", "Project plan", "a@example.com", &[]);
        let account = open(remote).await;
        account.sync_folder("INBOX").await.unwrap();

        let mut feed = account.subscribe_conversations("INBOX").await.unwrap();
        assert_eq!(feed.current().await.len(), 1);

        account
            .remote()
            .deliver("INBOX", "Re: Project plan", "b@example.com", &["a@example.com"]);
        account.sync_folder("INBOX").await.unwrap();

        let listing = timeout(WAIT, feed.next()).await.unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].members.len(), 2);
    }

    #[tokio::test]
    async fn unknown_folder() {
        let account = open(FakeRemote::new()).await;
        assert!(matches!(
            account.conversations_in("Nope").await,
            Err(Error::UnknownFolder(_))
        ));
        assert!(account.subscribe_conversations("Nope").await.is_err());
    }
}

mod message_tests {
    use super::*;

    #[tokio::test]
    async fn search_within_a_folder() {
        let account = open(planning_inbox()).await;
        account.sync_folder("INBOX").await.unwrap();

        let hits = account.search("plan", Some("INBOX"), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(account.search("lunch", None, 10).await.unwrap().len(), 1);
        assert!(matches!(
            account.search("plan", Some("Nope"), 10).await,
            Err(Error::UnknownFolder(_))
        ));
    }

    #[tokio::test]
    async fn open_message_parses_the_body() {
        let account = open(planning_inbox()).await;
        account.sync_folder("INBOX").await.unwrap();
        let inbox = account.store().folder("INBOX").await.unwrap().unwrap();

        let message = account.open_message(MessageKey::new(inbox.id, 1)).await.unwrap();
        assert_eq!(message.subject().as_deref(), Some("Project plan"));
        assert_eq!(message.text_body().as_deref().map(str::trim), Some("Body of Project plan"));
    }

    #[tokio::test]
    async fn composed_mail_uses_the_account_sender() {
        let account = open(FakeRemote::new()).await;
        let message = account
            .compose()
            .to(Mailbox::new("carol@example.com"))
            .subject("Hello")
            .text_body("Hi Carol")
            .build()
            .unwrap();
        assert_eq!(message.sender, "bob@example.com");
        assert!(String::from_utf8_lossy(&message.bytes).contains("Bob"));

        let err = account.send(&message).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }
}

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn session_events_trigger_syncs_until_shutdown() {
        let remote = FakeRemote::new();
        remote.create_folder("INBOX", 1);
        remote.deliver_many("INBOX", 1);
        let account = open(remote).await;
        let mut events = account.events();
        let (stop, shutdown) = watch::channel(false);

        let driver = async {
            assert_eq!(next_change(&mut events).await, 1);

            account.remote().deliver_many("INBOX", 1);
            account.remote().notify(SessionEvent::Exists {
                mailbox: "INBOX".to_string(),
                count: 2,
            });
            assert_eq!(next_change(&mut events).await, 1);
            stop.send(true).unwrap();
        };
        timeout(WAIT, async { tokio::join!(account.run(shutdown), driver) })
            .await
            .unwrap();

        let inbox = account.store().folder("INBOX").await.unwrap().unwrap();
        assert_eq!(account.store().messages(inbox.id).await.unwrap().len(), 2);
        // Stopped accounts do not sync again.
        assert!(matches!(*account.sync_folder("INBOX").await.unwrap_err(), Error::Cancelled));
    }

    #[tokio::test]
    async fn reconnect_resyncs_everything() {
        let remote = FakeRemote::new();
        remote.create_folder("Archive", 2);
        remote.create_folder("INBOX", 1);
        remote.deliver_many("INBOX", 1);
        let account = open(remote).await;
        let (stop, shutdown) = watch::channel(false);
        let mut events = account.events();

        let driver = async {
            // Startup syncs Archive, then INBOX.
            assert_eq!(next_change(&mut events).await, 1);
            account.remote().deliver_many("Archive", 2);
            account.remote().notify(SessionEvent::Reconnected);
            assert_eq!(next_change(&mut events).await, 2);
            stop.send(true).unwrap();
        };
        timeout(WAIT, async { tokio::join!(account.run(shutdown), driver) })
            .await
            .unwrap();
        let archive = account.store().folder("Archive").await.unwrap().unwrap();
        assert_eq!(account.store().messages(archive.id).await.unwrap().len(), 2);
    }
}

mod removal_tests {
    use super::*;

    #[tokio::test]
    async fn remove_deletes_the_store_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work.sqlite");
        let account = open_with(Store::open(&path).await.unwrap(), planning_inbox()).await;
        account.refresh_folders().await.unwrap();
        account.sync_folder("INBOX").await.unwrap();
        let engine_store = account.store().clone();

        account.remove().await.unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("work.sqlite-wal").exists());
        assert!(!dir.path().join("work.sqlite-shm").exists());
        assert!(engine_store.folders().await.is_err());
    }

    #[tokio::test]
    async fn remove_in_memory_account() {
        let account = open(planning_inbox()).await;
        account.refresh_folders().await.unwrap();
        account.remove().await.unwrap();
    }
}
