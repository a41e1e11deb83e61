//! Folder reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Days, Utc};
use mailloom_imap::Flags;
use tokio::sync::{Mutex, broadcast};

use super::CancelSignal;
use super::remote::{RemoteChanges, RemoteFlags, RemoteFolder, RemoteMailbox, UidQuery};
use crate::config::SyncSettings;
use crate::conversation::{ConversationDelta, Conversations};
use crate::store::{AppliedBatch, Checkpoint, FlagUpdate, Folder, FolderId, MessageKey, Store, SyncBatch};
use crate::{Error, Result};

/// Outcome of one folder sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Folder path.
    pub folder: String,
    /// Records added.
    pub inserted: usize,
    /// Records whose flags changed.
    pub updated: usize,
    /// Records removed, including those dropped by a UIDVALIDITY reset.
    pub removed: usize,
    /// The cache was discarded because UIDVALIDITY changed.
    pub full_resync: bool,
    /// Batches committed.
    pub batches: usize,
}

impl SyncReport {
    fn absorb(&mut self, applied: &AppliedBatch) {
        self.inserted += applied.inserted.len();
        self.updated += applied.updated;
        self.removed += applied.removed.len();
        self.batches += 1;
    }
}

/// Emitted after every commit that changed the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Records of a folder changed.
    FolderChanged {
        /// Folder.
        folder: FolderId,
        /// Folder path.
        path: String,
        /// Records added.
        inserted: usize,
        /// Records updated.
        updated: usize,
        /// Records removed.
        removed: usize,
    },
    /// A folder's cache was discarded after a UIDVALIDITY change.
    FolderReset {
        /// Folder.
        folder: FolderId,
        /// Folder path.
        path: String,
        /// The new UIDVALIDITY.
        uid_validity: u32,
    },
}

/// Changes to already-cached records.
#[derive(Debug, Default)]
struct CachedChanges {
    updates: Vec<FlagUpdate>,
    removals: Vec<u32>,
}

/// Reconciles folders of one account.
///
/// All server work goes through one lock, since the server side has a
/// single selected mailbox. Store writes are additionally serialized per
/// folder by the store.
#[derive(Debug)]
pub struct SyncEngine<R> {
    remote: Arc<R>,
    store: Store,
    conversations: Arc<Conversations>,
    settings: SyncSettings,
    remote_lock: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteMailbox> SyncEngine<R> {
    /// Creates an engine.
    #[must_use]
    pub fn new(remote: Arc<R>, store: Store, conversations: Arc<Conversations>, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            remote,
            store,
            conversations,
            settings,
            remote_lock: Mutex::new(()),
            events,
        }
    }

    /// The remote side.
    #[must_use]
    pub const fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Commit notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Lists the server's folders and records them. Folders that vanished
    /// from the server are deleted locally.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or a store write fails.
    pub async fn refresh_folders(&self) -> Result<Vec<Folder>> {
        let listed = {
            let _remote = self.remote_lock.lock().await;
            let listed = self.remote.list_folders().await;
            self.release().await;
            listed?
        };

        let mut folders = Vec::with_capacity(listed.len());
        for info in &listed {
            folders.push(self.store.upsert_folder(&info.path, info.special_use).await?);
        }
        for stale in self.store.folders().await? {
            if listed.iter().all(|info| info.path != stale.path) {
                let removed = self.store.delete_folder(stale.id).await?;
                tracing::info!(folder = %stale.path, removed = removed.len(), "folder gone from server");
                self.conversations.apply(ConversationDelta { inserted: Vec::new(), removed }).await;
            }
        }
        Ok(folders)
    }

    /// Raw message, from the cache or else from the server (and then
    /// cached).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMessage`] if neither side has it.
    pub async fn message_body(&self, key: MessageKey) -> Result<Vec<u8>> {
        if let Some(raw) = self.store.body(key).await? {
            return Ok(raw);
        }
        let folder = self
            .store
            .folder_by_id(key.folder)
            .await?
            .ok_or_else(|| Error::UnknownFolder(key.folder.to_string()))?;
        let unknown = || Error::UnknownMessage {
            folder: folder.path.clone(),
            uid: key.uid,
        };
        if self.store.message(key).await?.is_none() {
            return Err(unknown());
        }

        let fetched = {
            let _remote = self.remote_lock.lock().await;
            let fetched = self.remote.fetch_body(&folder.path, key.uid).await;
            self.release().await;
            fetched?
        };
        let raw = fetched.ok_or_else(unknown)?;
        self.store.store_body(key, &raw).await?;
        tracing::debug!(folder = %folder.path, uid = key.uid, bytes = raw.len(), "body cached");
        Ok(raw)
    }

    /// Brings one folder's cache in line with the server.
    ///
    /// Work is committed in batches, each together with the checkpoint it
    /// reaches, so an interrupted sync resumes where it stopped.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when `cancel` fires; committed batches stay.
    /// Remote and store errors otherwise.
    pub async fn sync_folder(&self, path: &str, cancel: &CancelSignal) -> Result<SyncReport> {
        let _remote = self.remote_lock.lock().await;
        let result = self.sync_locked(path, cancel).await;
        self.release().await;
        match &result {
            Ok(report) => tracing::info!(
                folder = path,
                inserted = report.inserted,
                updated = report.updated,
                removed = report.removed,
                batches = report.batches,
                full_resync = report.full_resync,
                "folder synced"
            ),
            Err(Error::Cancelled) => tracing::info!(folder = path, "sync cancelled"),
            Err(error) => tracing::warn!(folder = path, %error, "sync failed"),
        }
        result
    }

    async fn release(&self) {
        if let Err(error) = self.remote.release().await {
            tracing::debug!(%error, "could not resume watching");
        }
    }

    async fn sync_locked(&self, path: &str, cancel: &CancelSignal) -> Result<SyncReport> {
        cancel.check()?;
        let mut report = SyncReport {
            folder: path.to_string(),
            ..SyncReport::default()
        };
        let remote = cancel.run(self.remote.select(path)).await?;
        let folder = match self.store.folder(path).await? {
            Some(folder) => folder,
            None => self.store.upsert_folder(path, None).await?,
        };

        if folder.uid_validity != Some(remote.uid_validity) {
            report.full_resync = folder.uid_validity.is_some();
            let removed = self.store.reset_folder(folder.id, remote.uid_validity).await?;
            report.removed += removed.len();
            if report.full_resync {
                tracing::warn!(
                    folder = path,
                    old = ?folder.uid_validity,
                    new = remote.uid_validity,
                    dropped = removed.len(),
                    "UIDVALIDITY changed; cache discarded"
                );
                let _ = self.events.send(SyncEvent::FolderReset {
                    folder: folder.id,
                    path: path.to_string(),
                    uid_validity: remote.uid_validity,
                });
            }
            self.conversations
                .apply(ConversationDelta {
                    inserted: Vec::new(),
                    removed,
                })
                .await;
        }

        let previous = self
            .store
            .checkpoint(folder.id)
            .await?
            .filter(|c| c.uid_validity == remote.uid_validity);
        let cached_through = previous.map_or(0, |c| c.highest_uid);
        let local = self.store.local_flags(folder.id).await?;

        let changes = self
            .cached_changes(&remote, previous.and_then(|c| c.highest_modseq), cached_through, &local, cancel)
            .await?;
        let new_uids = self.new_uids(cached_through, &local, cancel).await?;

        let chunks: Vec<&[u32]> = if new_uids.is_empty() {
            vec![new_uids.as_slice()]
        } else {
            new_uids.chunks(self.settings.batch_size.max(1)).collect()
        };
        let last = chunks.len() - 1;
        let mut changes = Some(changes);
        let mut highest_uid = cached_through;
        for (index, chunk) in chunks.into_iter().enumerate() {
            cancel.check()?;
            let inserts = if chunk.is_empty() {
                Vec::new()
            } else {
                cancel.run(self.remote.fetch_headers(chunk)).await?
            };
            let CachedChanges { updates, removals } = changes.take().unwrap_or_default();
            let batch = SyncBatch {
                inserts,
                flag_updates: updates,
                removals,
            };
            highest_uid = chunk.last().copied().unwrap_or(highest_uid).max(highest_uid);
            // The mod-sequence is only final once every batch is in.
            let checkpoint = Checkpoint {
                uid_validity: remote.uid_validity,
                highest_uid,
                highest_modseq: if index == last {
                    remote.highest_modseq
                } else {
                    previous.and_then(|c| c.highest_modseq)
                },
            };

            let applied = self.store.apply_batch(folder.id, &batch, &checkpoint).await?;
            report.absorb(&applied);
            if !applied.is_noop() {
                let _ = self.events.send(SyncEvent::FolderChanged {
                    folder: folder.id,
                    path: path.to_string(),
                    inserted: applied.inserted.len(),
                    updated: applied.updated,
                    removed: applied.removed.len(),
                });
                self.conversations.apply(applied.into()).await;
            }
        }
        Ok(report)
    }

    /// Flag changes and expunges among UIDs already cached.
    async fn cached_changes(
        &self,
        remote: &RemoteFolder,
        since_modseq: Option<u64>,
        cached_through: u32,
        local: &BTreeMap<u32, Flags>,
        cancel: &CancelSignal,
    ) -> Result<CachedChanges> {
        if local.is_empty() || cached_through == 0 {
            return Ok(CachedChanges::default());
        }

        if let (Some(since), Some(current)) = (since_modseq, remote.highest_modseq) {
            if since == current && remote.qresync {
                return Ok(CachedChanges::default());
            }
            let changes = if since == current {
                RemoteChanges::default()
            } else {
                cancel
                    .run(self.remote.fetch_changed_since(cached_through, since, remote.qresync))
                    .await?
            };
            let removals = match changes.vanished {
                Some(vanished) => vanished.into_iter().filter(|uid| local.contains_key(uid)).collect(),
                None => {
                    let present = cancel
                        .run(self.remote.search_uids(UidQuery {
                            after: 0,
                            through: Some(cached_through),
                            since: None,
                        }))
                        .await?;
                    missing(local, &present.into_iter().collect())
                }
            };
            tracing::debug!(changed = changes.changed.len(), removed = ?removals, "condstore diff");
            return Ok(CachedChanges {
                updates: flag_updates(local, changes.changed),
                removals,
            });
        }

        let remote_flags = cancel.run(self.remote.fetch_flags(cached_through)).await?;
        let present: BTreeSet<u32> = remote_flags.iter().map(|f| f.uid).collect();
        Ok(CachedChanges {
            removals: missing(local, &present),
            updates: flag_updates(local, remote_flags),
        })
    }

    /// UIDs above the checkpoint to fetch, within the configured window.
    async fn new_uids(&self, cached_through: u32, local: &BTreeMap<u32, Flags>, cancel: &CancelSignal) -> Result<Vec<u32>> {
        let since = self
            .settings
            .since_days
            .and_then(|days| Utc::now().date_naive().checked_sub_days(Days::new(u64::from(days))));
        let mut uids = cancel
            .run(self.remote.search_uids(UidQuery {
                after: cached_through,
                through: None,
                since,
            }))
            .await?;
        uids.retain(|uid| !local.contains_key(uid));
        if let Some(limit) = self.settings.max_messages_per_folder
            && uids.len() > limit
        {
            // Keep the newest.
            uids.drain(..uids.len() - limit);
        }
        Ok(uids)
    }
}

/// Cached UIDs not present remotely.
fn missing(local: &BTreeMap<u32, Flags>, present: &BTreeSet<u32>) -> Vec<u32> {
    local.keys().filter(|uid| !present.contains(uid)).copied().collect()
}

/// Remote flag states that differ from the cache. UIDs not cached are
/// ignored.
fn flag_updates(local: &BTreeMap<u32, Flags>, remote: Vec<RemoteFlags>) -> Vec<FlagUpdate> {
    remote
        .into_iter()
        .filter_map(|r| {
            let cached = local.get(&r.uid)?;
            let flags = r.flags.persistent();
            (cached != &flags).then_some(FlagUpdate {
                uid: r.uid,
                flags,
                modseq: r.modseq,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn flags(list: &str) -> Flags {
        Flags::parse_list(list)
    }

    #[test]
    fn only_differing_flags_are_updated() {
        let local: BTreeMap<u32, Flags> = [(1, flags("\\Seen")), (2, flags("")), (3, flags("\\Seen"))].into();
        let remote = vec![
            RemoteFlags {
                uid: 1,
                flags: flags("\\Seen \\Recent"),
                modseq: Some(5),
            },
            RemoteFlags {
                uid: 2,
                flags: flags("\\Flagged"),
                modseq: Some(6),
            },
            RemoteFlags {
                uid: 9,
                flags: flags("\\Seen"),
                modseq: None,
            },
        ];
        let updates = flag_updates(&local, remote);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].uid, 2);
        assert!(updates[0].flags.is_flagged());
    }

    #[test]
    fn missing_uids() {
        let local: BTreeMap<u32, Flags> = [(1, Flags::new()), (2, Flags::new()), (3, Flags::new())].into();
        let present: BTreeSet<u32> = [2, 3, 4].into();
        assert_eq!(missing(&local, &present), vec![1]);
    }
}
