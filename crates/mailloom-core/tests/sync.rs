//! Folder synchronization against an in-memory server.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{FakeRemote, settings};
use mailloom_core::conversation::Conversations;
use mailloom_core::config::SyncSettings;
use mailloom_core::store::{MessageKey, Store};
use mailloom_core::sync::{CancelSignal, SyncEngine, SyncEvent, SyncScheduler};
use mailloom_core::Error;

async fn engine_with(remote: FakeRemote, settings: SyncSettings) -> SyncEngine<FakeRemote> {
    let store = Store::in_memory().await.unwrap();
    let conversations = Arc::new(Conversations::new(Vec::new()));
    SyncEngine::new(Arc::new(remote), store, conversations, settings)
}

async fn engine(remote: FakeRemote, batch_size: usize) -> SyncEngine<FakeRemote> {
    engine_with(remote, settings(batch_size)).await
}

async fn local_uids(engine: &SyncEngine<FakeRemote>, path: &str) -> Vec<u32> {
    let folder = engine.store().folder(path).await.unwrap().unwrap();
    engine.store().local_flags(folder.id).await.unwrap().into_keys().collect()
}

fn inbox_with(remote: FakeRemote, count: u32) -> FakeRemote {
    remote.create_folder("INBOX", 1);
    remote.deliver_many("INBOX", count);
    remote
}

mod reconcile_tests {
    use super::*;

    /// Cache {1,2,3}, server {2,3,4}: 1 goes, 4 comes, 2 and 3 stay.
    async fn expunge_and_delivery(remote: FakeRemote) {
        let engine = engine(inbox_with(remote, 3), 50).await;
        let never = CancelSignal::never();
        engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2, 3]);

        engine.remote().expunge("INBOX", 1);
        engine.remote().deliver_many("INBOX", 1);
        let report = engine.sync_folder("INBOX", &never).await.unwrap();

        assert_eq!(local_uids(&engine, "INBOX").await, vec![2, 3, 4]);
        assert_eq!(local_uids(&engine, "INBOX").await, engine.remote().uids("INBOX"));
        assert_eq!(report.inserted, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.updated, 0);
        assert!(!report.full_resync);

        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();
        let checkpoint = engine.store().checkpoint(folder.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.highest_uid, 4);
    }

    #[tokio::test]
    async fn full_diff() {
        expunge_and_delivery(FakeRemote::new()).await;
    }

    #[tokio::test]
    async fn condstore_with_search_for_expunges() {
        expunge_and_delivery(FakeRemote::new().with_condstore(false)).await;
    }

    #[tokio::test]
    async fn condstore_with_vanished() {
        expunge_and_delivery(FakeRemote::new().with_condstore(true)).await;
    }

    async fn flag_change(remote: FakeRemote) {
        let engine = engine(inbox_with(remote, 3), 50).await;
        let never = CancelSignal::never();
        engine.sync_folder("INBOX", &never).await.unwrap();

        engine.remote().set_flags("INBOX", 2, "\\Seen \\Flagged");
        let report = engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);

        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();
        let record = engine.store().message(MessageKey::new(folder.id, 2)).await.unwrap().unwrap();
        assert!(record.flags.is_flagged());
        assert!(record.flags.is_seen());
        let untouched = engine.store().message(MessageKey::new(folder.id, 3)).await.unwrap().unwrap();
        assert!(!untouched.flags.is_seen());
    }

    #[tokio::test]
    async fn flag_change_full_diff() {
        flag_change(FakeRemote::new()).await;
    }

    #[tokio::test]
    async fn flag_change_condstore() {
        flag_change(FakeRemote::new().with_condstore(true)).await;
    }

    #[tokio::test]
    async fn unchanged_mailbox_skips_flag_fetch_with_qresync() {
        let engine = engine(inbox_with(FakeRemote::new().with_condstore(true), 3), 50).await;
        let never = CancelSignal::never();
        engine.sync_folder("INBOX", &never).await.unwrap();
        engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(engine.remote().flag_fetches(), 0);
    }

    #[tokio::test]
    async fn without_condstore_every_sync_diffs_flags() {
        let engine = engine(inbox_with(FakeRemote::new(), 3), 50).await;
        let never = CancelSignal::never();
        engine.sync_folder("INBOX", &never).await.unwrap();
        engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(engine.remote().flag_fetches(), 1);
    }

    #[tokio::test]
    async fn second_sync_changes_nothing() {
        let engine = engine(inbox_with(FakeRemote::new(), 4), 3).await;
        let never = CancelSignal::never();
        let first = engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(first.inserted, 4);
        assert_eq!(first.batches, 2);

        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();
        let before = engine.store().messages(folder.id).await.unwrap();
        let mut events = engine.subscribe();

        let second = engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!((second.inserted, second.updated, second.removed), (0, 0, 0));
        assert_eq!(engine.store().messages(folder.id).await.unwrap(), before);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn window_keeps_newest_messages() {
        let remote = inbox_with(FakeRemote::new(), 5);
        let engine = engine_with(
            remote,
            SyncSettings {
                max_messages_per_folder: Some(2),
                ..settings(50)
            },
        )
        .await;
        engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        assert_eq!(local_uids(&engine, "INBOX").await, vec![4, 5]);
    }

    #[tokio::test]
    async fn commits_are_announced() {
        let engine = engine(inbox_with(FakeRemote::new(), 2), 50).await;
        let mut events = engine.subscribe();
        engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        match events.try_recv().unwrap() {
            SyncEvent::FolderChanged { path, inserted, .. } => {
                assert_eq!(path, "INBOX");
                assert_eq!(inserted, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

mod uid_validity_tests {
    use super::*;

    #[tokio::test]
    async fn change_discards_only_that_folder() {
        let remote = inbox_with(FakeRemote::new(), 3);
        remote.create_folder("Archive", 5);
        remote.deliver_many("Archive", 3);
        let engine = engine(remote, 50).await;
        let never = CancelSignal::never();
        engine.sync_folder("INBOX", &never).await.unwrap();
        engine.sync_folder("Archive", &never).await.unwrap();

        let archive = engine.store().folder("Archive").await.unwrap().unwrap();
        let archive_before = engine.store().messages(archive.id).await.unwrap();
        let archive_checkpoint = engine.store().checkpoint(archive.id).await.unwrap();

        engine.remote().renumber("INBOX", 2);
        engine.remote().deliver_many("INBOX", 1);
        let mut events = engine.subscribe();
        let report = engine.sync_folder("INBOX", &never).await.unwrap();

        assert!(report.full_resync);
        assert_eq!(report.removed, 3);
        assert_eq!(report.inserted, 4);
        let inbox = engine.store().folder("INBOX").await.unwrap().unwrap();
        assert_eq!(inbox.uid_validity, Some(2));
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2, 3, 4]);
        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::FolderReset {
                folder: inbox.id,
                path: "INBOX".to_string(),
                uid_validity: 2,
            }
        );

        assert_eq!(engine.store().messages(archive.id).await.unwrap(), archive_before);
        assert_eq!(engine.store().checkpoint(archive.id).await.unwrap(), archive_checkpoint);
    }

    #[tokio::test]
    async fn first_sync_is_not_a_resync() {
        let engine = engine(inbox_with(FakeRemote::new(), 1), 50).await;
        let report = engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        assert!(!report.full_resync);
        assert_eq!(report.removed, 0);
    }
}

mod interruption_tests {
    use super::*;

    #[tokio::test]
    async fn lost_connection_resumes_from_checkpoint() {
        let remote = inbox_with(FakeRemote::new(), 5);
        remote.fail_header_fetch(1);
        let engine = engine(remote, 2).await;
        let never = CancelSignal::never();

        let err = engine.sync_folder("INBOX", &never).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2]);
        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();
        assert_eq!(engine.store().checkpoint(folder.id).await.unwrap().unwrap().highest_uid, 2);
        assert_eq!(engine.remote().header_fetches(), 2);

        let report = engine.sync_folder("INBOX", &never).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2, 3, 4, 5]);
        // Only the missing range is fetched again: [3, 4] and [5].
        assert_eq!(engine.remote().header_fetches(), 4);
    }

    #[tokio::test]
    async fn cancellation_keeps_committed_batches() {
        let remote = inbox_with(FakeRemote::new(), 5);
        let (handle, signal) = CancelSignal::pair();
        remote.cancel_after_header_fetch(0, handle);
        let engine = engine(remote, 2).await;

        let err = engine.sync_folder("INBOX", &signal).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2]);

        let report = engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(local_uids(&engine, "INBOX").await, vec![1, 2, 3, 4, 5]);
    }
}

mod scheduler_tests {
    use super::*;

    #[tokio::test]
    async fn triggers_during_a_run_coalesce_into_one() {
        let engine = Arc::new(engine(inbox_with(FakeRemote::new(), 3), 50).await);
        let scheduler = SyncScheduler::new(Arc::clone(&engine), CancelSignal::never());

        let first = scheduler.trigger("INBOX");
        let followers: Vec<_> = (0..4).map(|_| scheduler.trigger("INBOX")).collect();
        assert!(scheduler.is_running("INBOX"));

        assert_eq!(first.wait().await.unwrap().inserted, 3);
        for follower in followers {
            let report = follower.wait().await.unwrap();
            assert_eq!(report.inserted, 0);
        }
        assert_eq!(engine.remote().selects(), 2);
        assert!(!scheduler.is_running("INBOX"));
    }

    #[tokio::test]
    async fn folders_run_independently() {
        let remote = inbox_with(FakeRemote::new(), 2);
        remote.create_folder("Sent", 3);
        remote.deliver_many("Sent", 1);
        let engine = Arc::new(engine(remote, 50).await);
        let scheduler = SyncScheduler::new(Arc::clone(&engine), CancelSignal::never());

        let inbox = scheduler.trigger("INBOX");
        let sent = scheduler.trigger("Sent");
        assert_eq!(inbox.wait().await.unwrap().inserted, 2);
        assert_eq!(sent.wait().await.unwrap().inserted, 1);
        assert_eq!(engine.remote().selects(), 2);
    }

    #[tokio::test]
    async fn cancelled_scheduler_does_no_work() {
        let engine = Arc::new(engine(inbox_with(FakeRemote::new(), 3), 50).await);
        let (handle, signal) = CancelSignal::pair();
        let scheduler = SyncScheduler::new(Arc::clone(&engine), signal);
        handle.cancel();

        let err = scheduler.sync("INBOX").await.unwrap_err();
        assert!(matches!(*err, Error::Cancelled));
        assert_eq!(engine.remote().selects(), 0);
    }

    #[tokio::test]
    async fn unknown_folder_error_reaches_every_waiter() {
        let engine = Arc::new(engine(inbox_with(FakeRemote::new(), 1), 50).await);
        let scheduler = SyncScheduler::new(engine, CancelSignal::never());
        let first = scheduler.trigger("Nope");
        let second = scheduler.trigger("Nope");
        assert!(matches!(*first.wait().await.unwrap_err(), Error::CommandFailure(_)));
        assert!(matches!(*second.wait().await.unwrap_err(), Error::CommandFailure(_)));
    }
}

mod folder_tests {
    use super::*;

    #[tokio::test]
    async fn refresh_drops_folders_gone_from_server() {
        let remote = inbox_with(FakeRemote::new(), 1);
        remote.create_folder("Old", 9);
        remote.deliver_many("Old", 2);
        let engine = engine(remote, 50).await;

        assert_eq!(engine.refresh_folders().await.unwrap().len(), 2);
        engine.sync_folder("Old", &CancelSignal::never()).await.unwrap();

        engine.remote().delete_folder("Old");
        let folders = engine.refresh_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert!(engine.store().folder("Old").await.unwrap().is_none());
        assert!(engine.store().folder("INBOX").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bodies_are_fetched_once() {
        let engine = engine(inbox_with(FakeRemote::new(), 2), 50).await;
        engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();
        let key = MessageKey::new(folder.id, 1);

        let first = engine.message_body(key).await.unwrap();
        let second = engine.message_body(key).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.remote().body_fetches(), 1);
        assert!(String::from_utf8_lossy(&first).contains("Body of Message 1"));

        let hits = engine.store().search("body", Some(folder.id), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, key);
    }

    #[tokio::test]
    async fn missing_message_is_unknown() {
        let engine = engine(inbox_with(FakeRemote::new(), 1), 50).await;
        engine.sync_folder("INBOX", &CancelSignal::never()).await.unwrap();
        let folder = engine.store().folder("INBOX").await.unwrap().unwrap();

        let err = engine.message_body(MessageKey::new(folder.id, 99)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownMessage { uid: 99, .. }));
        assert_eq!(engine.remote().body_fetches(), 0);
    }
}
