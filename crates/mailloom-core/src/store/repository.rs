//! SQLite-backed store.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailloom_imap::{Flags, SpecialUse};
use mailloom_mime::{
    Envelope, format_address_list, format_msg_id_list, parse_address_list, parse_msg_id_list,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use super::locks::FolderLocks;
use super::migrations::migrate;
use super::model::{
    AppliedBatch, Checkpoint, FlagUpdate, Folder, FolderId, LinkFields, MessageKey, MessageRecord,
    NewMessage, SearchHit, SyncBatch,
};
use crate::{Error, Result};

const MESSAGE_COLUMNS: &str = "folder_id, uid, modseq, flags, size, subject, from_addr, to_addrs, \
                               cc_addrs, date, message_id, in_reply_to, refs";

/// The account's local store. Cheap to clone; clones share the pool and
/// the folder locks.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    locks: Arc<FolderLocks>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) the store at `path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationRequired`] if the schema cannot be
    /// upgraded, or an error if the database cannot be opened.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        tracing::debug!(path = %path.display(), "store opened");
        let mut store = Self::from_pool(pool).await?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // One connection that is never recycled: it is the database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, migrating it first.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open`].
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrate(&pool).await?;
        Ok(Self {
            pool,
            locks: Arc::new(FolderLocks::default()),
            path: None,
        })
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Database file, if the store lives on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the pool and deletes the database file. Clones of this
    /// store fail from then on.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be deleted.
    pub async fn destroy(self) -> Result<()> {
        self.pool.close().await;
        if let Some(path) = &self.path {
            Self::delete_files(path).await?;
        }
        Ok(())
    }

    /// Deletes the database at `path` together with its `-wal` and `-shm`
    /// files. Missing files are skipped. Returns whether anything was
    /// deleted. The store must not be open.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be deleted.
    pub async fn delete_files(path: &Path) -> Result<bool> {
        let mut deleted = false;
        for file in [path.to_path_buf(), sibling(path, "-wal"), sibling(path, "-shm")] {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => deleted = true,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        if deleted {
            tracing::info!(path = %path.display(), "store deleted");
        }
        Ok(deleted)
    }

    // ---- folders ----

    /// Creates the folder if it is new and records its role.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_folder(&self, path: &str, special_use: Option<SpecialUse>) -> Result<Folder> {
        sqlx::query(
            r"
            INSERT INTO folders (path, special_use) VALUES (?, ?)
            ON CONFLICT(path) DO UPDATE SET special_use = excluded.special_use
            ",
        )
        .bind(path)
        .bind(special_use.map(SpecialUse::as_str))
        .execute(&self.pool)
        .await?;
        self.folder(path)
            .await?
            .ok_or_else(|| Error::UnknownFolder(path.to_string()))
    }

    /// Looks a folder up by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folder(&self, path: &str) -> Result<Option<Folder>> {
        let row = sqlx::query(
            "SELECT id, path, uid_validity, highest_uid, special_use FROM folders WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(folder_from_row).transpose()
    }

    /// Looks a folder up by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folder_by_id(&self, id: FolderId) -> Result<Option<Folder>> {
        let row = sqlx::query(
            "SELECT id, path, uid_validity, highest_uid, special_use FROM folders WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(folder_from_row).transpose()
    }

    /// Every folder, by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folders(&self) -> Result<Vec<Folder>> {
        let rows = sqlx::query(
            "SELECT id, path, uid_validity, highest_uid, special_use FROM folders ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(folder_from_row).collect()
    }

    /// Deletes a folder with its records, bodies and checkpoint. Returns
    /// the removed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_folder(&self, id: FolderId) -> Result<Vec<MessageKey>> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;
        let removed = delete_folder_messages(&mut tx, id).await?;
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(folder = %id, removed = removed.len(), "folder deleted");
        Ok(removed)
    }

    /// Starts a new UIDVALIDITY epoch: drops the folder's records and
    /// checkpoint and records the new value, in one transaction. Other
    /// folders are untouched. Returns the removed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn reset_folder(&self, id: FolderId, uid_validity: u32) -> Result<Vec<MessageKey>> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;
        let removed = delete_folder_messages(&mut tx, id).await?;
        sqlx::query("DELETE FROM checkpoints WHERE folder_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query("UPDATE folders SET uid_validity = ?, highest_uid = 0 WHERE id = ?")
            .bind(uid_validity)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::UnknownFolder(id.to_string()));
        }
        tx.commit().await?;
        Ok(removed)
    }

    // ---- messages ----

    /// Applies one sync batch and advances the checkpoint in the same
    /// transaction. Applying the same batch twice leaves the same state.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is changed then.
    pub async fn apply_batch(
        &self,
        folder: FolderId,
        batch: &SyncBatch,
        checkpoint: &Checkpoint,
    ) -> Result<AppliedBatch> {
        let _guard = self.locks.lock(folder).await;
        let mut tx = self.pool.begin().await?;
        let mut applied = AppliedBatch::default();

        for &uid in &batch.removals {
            let deleted = sqlx::query("DELETE FROM messages WHERE folder_id = ? AND uid = ?")
                .bind(folder.0)
                .bind(uid)
                .execute(&mut *tx)
                .await?;
            if deleted.rows_affected() > 0 {
                applied.removed.push(MessageKey::new(folder, uid));
            }
        }

        for message in &batch.inserts {
            if insert_message(&mut tx, folder, message).await? {
                applied
                    .inserted
                    .push(LinkFields::from_envelope(MessageKey::new(folder, message.uid), &message.envelope));
            } else {
                let refresh = FlagUpdate {
                    uid: message.uid,
                    flags: message.flags.clone(),
                    modseq: message.modseq,
                };
                if set_flags(&mut tx, folder, &refresh).await? {
                    applied.updated += 1;
                }
            }
        }

        // Explicit updates win over the flags fetched with an insert.
        for update in &batch.flag_updates {
            if set_flags(&mut tx, folder, update).await? {
                applied.updated += 1;
            }
        }

        save_checkpoint(&mut tx, folder, checkpoint).await?;
        tx.commit().await?;

        tracing::debug!(
            folder = %folder,
            inserted = applied.inserted.len(),
            updated = applied.updated,
            removed = applied.removed.len(),
            highest_uid = checkpoint.highest_uid,
            "batch committed"
        );
        Ok(applied)
    }

    /// Bulk flag update outside a sync batch. Returns how many records
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is changed then.
    pub async fn update_flags(&self, folder: FolderId, updates: &[FlagUpdate]) -> Result<usize> {
        let _guard = self.locks.lock(folder).await;
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for update in updates {
            if set_flags(&mut tx, folder, update).await? {
                changed += 1;
            }
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// One cached record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn message(&self, key: MessageKey) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE folder_id = ? AND uid = ?"
        ))
        .bind(key.folder.0)
        .bind(key.uid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Every cached record of a folder, by UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn messages(&self, folder: FolderId) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE folder_id = ? ORDER BY uid"
        ))
        .bind(folder.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// UID to flags of every cached record of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn local_flags(&self, folder: FolderId) -> Result<BTreeMap<u32, Flags>> {
        let rows = sqlx::query("SELECT uid, flags FROM messages WHERE folder_id = ?")
            .bind(folder.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(u32, Flags)> {
                let flags: String = row.try_get("flags")?;
                Ok((row.try_get::<u32, _>("uid")?, Flags::parse_list(&flags)))
            })
            .collect()
    }

    /// Sync cursor of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn checkpoint(&self, folder: FolderId) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT uid_validity, highest_uid, highest_modseq FROM checkpoints WHERE folder_id = ?",
        )
        .bind(folder.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<Checkpoint> {
            Ok(Checkpoint {
                uid_validity: row.try_get("uid_validity")?,
                highest_uid: row.try_get("highest_uid")?,
                highest_modseq: from_db_modseq(row.try_get("highest_modseq")?),
            })
        })
        .transpose()
    }

    // ---- bodies ----

    /// Caches a raw message and indexes its text. Returns false if the
    /// record does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn store_body(&self, key: MessageKey, raw: &[u8]) -> Result<bool> {
        let text = mailloom_mime::Message::parse(raw)
            .ok()
            .and_then(|message| message.text_body())
            .unwrap_or_default();
        let _guard = self.locks.lock(key.folder).await;
        let result = sqlx::query(
            r"
            INSERT INTO bodies (message_id, raw, text)
            SELECT id, ?, ? FROM messages WHERE folder_id = ? AND uid = ?
            ON CONFLICT(message_id) DO UPDATE SET raw = excluded.raw, text = excluded.text
            ",
        )
        .bind(raw)
        .bind(text)
        .bind(key.folder.0)
        .bind(key.uid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cached raw message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn body(&self, key: MessageKey) -> Result<Option<Vec<u8>>> {
        let raw = sqlx::query_scalar(
            r"
            SELECT b.raw FROM bodies b JOIN messages m ON m.id = b.message_id
            WHERE m.folder_id = ? AND m.uid = ?
            ",
        )
        .bind(key.folder.0)
        .bind(key.uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(raw)
    }

    // ---- queries ----

    /// Full-text search over subject, sender, recipients and cached
    /// bodies, best match first. Every word must match.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn search(&self, query: &str, folder: Option<FolderId>, limit: u32) -> Result<Vec<SearchHit>> {
        let Some(expression) = fts_expression(query) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            r"
            SELECT m.folder_id, m.uid, bm25(messages_fts) AS rank
            FROM messages_fts JOIN messages m ON m.id = messages_fts.rowid
            WHERE messages_fts MATCH ? {}
            ORDER BY rank LIMIT ?
            ",
            if folder.is_some() { "AND m.folder_id = ?" } else { "" }
        );
        let mut statement = sqlx::query(&sql).bind(expression);
        if let Some(folder) = folder {
            statement = statement.bind(folder.0);
        }
        let rows = statement.bind(limit).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<SearchHit> {
                Ok(SearchHit {
                    key: MessageKey::new(FolderId(row.try_get("folder_id")?), row.try_get("uid")?),
                    rank: row.try_get("rank")?,
                })
            })
            .collect()
    }

    /// Link fields of every record, oldest first, for rebuilding the
    /// conversation index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn link_fields(&self) -> Result<Vec<LinkFields>> {
        let rows = sqlx::query(
            r"
            SELECT folder_id, uid, message_id, in_reply_to, refs, subject, date
            FROM messages ORDER BY date IS NULL, date, id
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<LinkFields> {
                let in_reply_to: String = row.try_get("in_reply_to")?;
                let refs: String = row.try_get("refs")?;
                let envelope = Envelope {
                    message_id: row.try_get("message_id")?,
                    in_reply_to: parse_msg_id_list(&in_reply_to),
                    references: parse_msg_id_list(&refs),
                    ..Envelope::default()
                };
                let key = MessageKey::new(FolderId(row.try_get("folder_id")?), row.try_get("uid")?);
                Ok(LinkFields {
                    subject: row.try_get("subject")?,
                    date: row.try_get("date")?,
                    ..LinkFields::from_envelope(key, &envelope)
                })
            })
            .collect()
    }
}

/// Deletes every record of a folder and returns their keys. As the first
/// statement of a transaction it takes the write lock before any read
/// snapshot exists, so a concurrent commit to another folder only makes
/// it wait.
async fn delete_folder_messages(tx: &mut Transaction<'_, Sqlite>, folder: FolderId) -> Result<Vec<MessageKey>> {
    let uids: Vec<u32> = sqlx::query_scalar("DELETE FROM messages WHERE folder_id = ? RETURNING uid")
        .bind(folder.0)
        .fetch_all(&mut **tx)
        .await?;
    Ok(uids.into_iter().map(|uid| MessageKey::new(folder, uid)).collect())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns true if the record existed and something changed.
async fn set_flags(tx: &mut Transaction<'_, Sqlite>, folder: FolderId, update: &FlagUpdate) -> Result<bool> {
    let flags = flags_to_db(&update.flags);
    let result = sqlx::query(
        r"
        UPDATE messages SET flags = ?1, modseq = COALESCE(?2, modseq)
        WHERE folder_id = ?3 AND uid = ?4 AND (flags <> ?1 OR modseq IS NOT COALESCE(?2, modseq))
        ",
    )
    .bind(flags)
    .bind(update.modseq.map(to_db_modseq))
    .bind(folder.0)
    .bind(update.uid)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns false if the UID was already cached.
async fn insert_message(tx: &mut Transaction<'_, Sqlite>, folder: FolderId, message: &NewMessage) -> Result<bool> {
    let envelope = &message.envelope;
    let result = sqlx::query(&format!(
        r"
        INSERT INTO messages ({MESSAGE_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(folder_id, uid) DO NOTHING
        "
    ))
    .bind(folder.0)
    .bind(message.uid)
    .bind(message.modseq.map(to_db_modseq))
    .bind(flags_to_db(&message.flags))
    .bind(message.size)
    .bind(&envelope.subject)
    .bind(format_address_list(&envelope.from))
    .bind(format_address_list(&envelope.to))
    .bind(format_address_list(&envelope.cc))
    .bind(envelope.date.map(|d| d.timestamp()))
    .bind(&envelope.message_id)
    .bind(format_msg_id_list(&envelope.in_reply_to))
    .bind(format_msg_id_list(&envelope.references))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn save_checkpoint(tx: &mut Transaction<'_, Sqlite>, folder: FolderId, checkpoint: &Checkpoint) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO checkpoints (folder_id, uid_validity, highest_modseq, highest_uid, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(folder_id) DO UPDATE SET
            uid_validity = excluded.uid_validity,
            highest_modseq = excluded.highest_modseq,
            highest_uid = excluded.highest_uid,
            updated_at = excluded.updated_at
        ",
    )
    .bind(folder.0)
    .bind(checkpoint.uid_validity)
    .bind(checkpoint.highest_modseq.map(to_db_modseq))
    .bind(checkpoint.highest_uid)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE folders SET uid_validity = ?, highest_uid = MAX(highest_uid, ?) WHERE id = ?")
        .bind(checkpoint.uid_validity)
        .bind(checkpoint.highest_uid)
        .bind(folder.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn folder_from_row(row: &SqliteRow) -> Result<Folder> {
    let special_use: Option<String> = row.try_get("special_use")?;
    Ok(Folder {
        id: FolderId(row.try_get("id")?),
        path: row.try_get("path")?,
        uid_validity: row.try_get("uid_validity")?,
        highest_uid: row.try_get("highest_uid")?,
        special_use: special_use.as_deref().and_then(SpecialUse::parse),
    })
}

fn record_from_row(row: &SqliteRow) -> Result<MessageRecord> {
    let flags: String = row.try_get("flags")?;
    let from: String = row.try_get("from_addr")?;
    let to: String = row.try_get("to_addrs")?;
    let cc: String = row.try_get("cc_addrs")?;
    let in_reply_to: String = row.try_get("in_reply_to")?;
    let refs: String = row.try_get("refs")?;
    let date: Option<i64> = row.try_get("date")?;
    Ok(MessageRecord {
        key: MessageKey::new(FolderId(row.try_get("folder_id")?), row.try_get("uid")?),
        modseq: from_db_modseq(row.try_get("modseq")?),
        flags: Flags::parse_list(&flags),
        size: row.try_get("size")?,
        envelope: Envelope {
            subject: row.try_get("subject")?,
            from: parse_address_list(&from),
            to: parse_address_list(&to),
            cc: parse_address_list(&cc),
            date: date.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            message_id: row.try_get("message_id")?,
            in_reply_to: parse_msg_id_list(&in_reply_to),
            references: parse_msg_id_list(&refs),
        },
    })
}

/// Space-separated, sorted; `\Recent` is session state and never stored.
fn flags_to_db(flags: &Flags) -> String {
    flags
        .persistent()
        .iter()
        .map(mailloom_imap::Flag::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_db_modseq(modseq: u64) -> i64 {
    i64::try_from(modseq).unwrap_or(i64::MAX)
}

fn from_db_modseq(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

/// Quotes every word so user input cannot use FTS5 query syntax.
fn fts_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
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
    use mailloom_imap::Flag;
    use mailloom_mime::Mailbox;

    fn flags(list: &str) -> Flags {
        Flags::parse_list(list)
    }

    fn message(uid: u32, subject: &str) -> NewMessage {
        NewMessage {
            uid,
            modseq: Some(u64::from(uid) * 10),
            flags: flags("\\Seen"),
            size: Some(1024),
            envelope: Envelope {
                subject: Some(subject.to_string()),
                from: vec![Mailbox::new("alice@example.com").with_name("Alice")],
                to: vec![Mailbox::new("bob@example.com")],
                date: DateTime::<Utc>::from_timestamp(1_700_000_000 + i64::from(uid), 0),
                message_id: Some(format!("{uid}@example.com")),
                references: vec!["root@example.com".to_string()],
                ..Envelope::default()
            },
        }
    }

    fn checkpoint(highest_uid: u32) -> Checkpoint {
        Checkpoint {
            uid_validity: 7,
            highest_uid,
            highest_modseq: Some(100),
        }
    }

    async fn store_with_inbox() -> (Store, Folder) {
        let store = Store::in_memory().await.unwrap();
        let inbox = store.upsert_folder("INBOX", Some(SpecialUse::Inbox)).await.unwrap();
        store.reset_folder(inbox.id, 7).await.unwrap();
        (store, inbox)
    }

    mod folder_tests {
        use super::*;

        #[tokio::test]
        async fn upsert_is_stable() {
            let store = Store::in_memory().await.unwrap();
            let first = store.upsert_folder("Archive", None).await.unwrap();
            let second = store.upsert_folder("Archive", Some(SpecialUse::Archive)).await.unwrap();
            assert_eq!(first.id, second.id);
            assert_eq!(second.special_use, Some(SpecialUse::Archive));
            assert_eq!(second.uid_validity, None);
            assert_eq!(store.folders().await.unwrap().len(), 1);
            assert_eq!(store.folder_by_id(first.id).await.unwrap().unwrap().path, "Archive");
        }

        #[tokio::test]
        async fn delete_cascades() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "hello")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(1)).await.unwrap();
            store.store_body(MessageKey::new(inbox.id, 1), b"Subject: hello\r\n\r\nbody").await.unwrap();

            let removed = store.delete_folder(inbox.id).await.unwrap();
            assert_eq!(removed, vec![MessageKey::new(inbox.id, 1)]);
            assert!(store.folder("INBOX").await.unwrap().is_none());
            assert!(store.search("hello", None, 10).await.unwrap().is_empty());
            assert!(store.checkpoint(inbox.id).await.unwrap().is_none());
        }
    }

    mod batch_tests {
        use super::*;

        #[tokio::test]
        async fn apply_inserts_and_checkpoints() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "one"), message(2, "two")],
                ..SyncBatch::default()
            };
            let applied = store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
            assert_eq!(applied.inserted.len(), 2);
            assert_eq!(applied.inserted[0].parents, vec!["root@example.com"]);

            let record = store.message(MessageKey::new(inbox.id, 2)).await.unwrap().unwrap();
            assert_eq!(record.envelope.subject.as_deref(), Some("two"));
            assert_eq!(record.envelope.from[0].name.as_deref(), Some("Alice"));
            assert_eq!(record.modseq, Some(20));
            assert!(record.flags.is_seen());
            assert_eq!(record.envelope, message(2, "two").envelope);

            assert_eq!(store.checkpoint(inbox.id).await.unwrap(), Some(checkpoint(2)));
            assert_eq!(store.folder("INBOX").await.unwrap().unwrap().highest_uid, 2);
        }

        #[tokio::test]
        async fn same_batch_twice_is_idempotent() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "one"), message(2, "two")],
                flag_updates: vec![FlagUpdate {
                    uid: 1,
                    flags: flags("\\Seen \\Flagged"),
                    modseq: Some(11),
                }],
                removals: vec![9],
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
            let first = store.messages(inbox.id).await.unwrap();

            let again = store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
            assert!(again.inserted.is_empty());
            assert!(again.removed.is_empty());
            assert_eq!(store.messages(inbox.id).await.unwrap(), first);
        }

        #[tokio::test]
        async fn flag_updates_and_removals() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "one"), message(2, "two")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();

            let batch = SyncBatch {
                flag_updates: vec![FlagUpdate {
                    uid: 2,
                    flags: flags("\\Seen \\Flagged \\Recent"),
                    modseq: Some(30),
                }],
                removals: vec![1],
                ..SyncBatch::default()
            };
            let applied = store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
            assert_eq!(applied.removed, vec![MessageKey::new(inbox.id, 1)]);
            assert_eq!(applied.updated, 1);

            let local = store.local_flags(inbox.id).await.unwrap();
            assert_eq!(local.len(), 1);
            assert!(local[&2].is_flagged());
            assert!(!local[&2].contains(&Flag::Recent));
        }

        #[tokio::test]
        async fn failed_batch_changes_nothing() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "one")],
                ..SyncBatch::default()
            };
            assert!(store.apply_batch(FolderId(999), &batch, &checkpoint(1)).await.is_err());
            assert!(store.messages(FolderId(999)).await.unwrap().is_empty());
            assert!(store.checkpoint(FolderId(999)).await.unwrap().is_none());
            assert!(store.checkpoint(inbox.id).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn bulk_flag_update() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "one"), message(2, "two")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
            let updates: Vec<FlagUpdate> = [1, 2, 3]
                .into_iter()
                .map(|uid| FlagUpdate {
                    uid,
                    flags: flags("\\Seen \\Answered"),
                    modseq: None,
                })
                .collect();
            assert_eq!(store.update_flags(inbox.id, &updates).await.unwrap(), 2);
            assert_eq!(store.update_flags(inbox.id, &updates).await.unwrap(), 0);
        }

        #[tokio::test]
        async fn reset_clears_only_that_folder() {
            let (store, inbox) = store_with_inbox().await;
            let sent = store.upsert_folder("Sent", Some(SpecialUse::Sent)).await.unwrap();
            store.reset_folder(sent.id, 3).await.unwrap();
            let batch = SyncBatch {
                inserts: vec![message(1, "one")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(1)).await.unwrap();
            store
                .apply_batch(sent.id, &batch, &Checkpoint { uid_validity: 3, ..checkpoint(1) })
                .await
                .unwrap();

            let removed = store.reset_folder(inbox.id, 8).await.unwrap();
            assert_eq!(removed, vec![MessageKey::new(inbox.id, 1)]);
            let inbox = store.folder("INBOX").await.unwrap().unwrap();
            assert_eq!(inbox.uid_validity, Some(8));
            assert_eq!(inbox.highest_uid, 0);
            assert!(store.messages(inbox.id).await.unwrap().is_empty());
            assert!(store.checkpoint(inbox.id).await.unwrap().is_none());

            assert_eq!(store.messages(sent.id).await.unwrap().len(), 1);
            assert!(store.checkpoint(sent.id).await.unwrap().is_some());
        }
    }

    mod search_tests {
        use super::*;

        #[tokio::test]
        async fn matches_headers_and_bodies() {
            let (store, inbox) = store_with_inbox().await;
            let batch = SyncBatch {
                inserts: vec![message(1, "Quarterly budget"), message(2, "Lunch plans")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();

            let hits = store.search("budget", None, 10).await.unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].key, MessageKey::new(inbox.id, 1));

            assert!(store.search("pineapple", None, 10).await.unwrap().is_empty());
            let raw = b"Subject: Lunch plans\r\nContent-Type: text/plain\r\n\r\nBring pineapple pizza";
            assert!(store.store_body(MessageKey::new(inbox.id, 2), raw).await.unwrap());
            let hits = store.search("pineapple", Some(inbox.id), 10).await.unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(store.body(MessageKey::new(inbox.id, 2)).await.unwrap().unwrap(), raw.to_vec());

            assert_eq!(store.search("alice", None, 10).await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn folder_filter_and_syntax_safety() {
            let (store, inbox) = store_with_inbox().await;
            let other = store.upsert_folder("Other", None).await.unwrap();
            store.reset_folder(other.id, 7).await.unwrap();
            let batch = SyncBatch {
                inserts: vec![message(1, "budget")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(1)).await.unwrap();
            store.apply_batch(other.id, &batch, &checkpoint(1)).await.unwrap();

            assert_eq!(store.search("budget", None, 10).await.unwrap().len(), 2);
            assert_eq!(store.search("budget", Some(other.id), 10).await.unwrap().len(), 1);
            assert!(store.search("   ", None, 10).await.unwrap().is_empty());
            assert!(store.search("budget\" OR NEAR(", None, 10).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn body_for_missing_record() {
            let (store, inbox) = store_with_inbox().await;
            assert!(!store.store_body(MessageKey::new(inbox.id, 5), b"x").await.unwrap());
            assert!(store.body(MessageKey::new(inbox.id, 5)).await.unwrap().is_none());
        }
    }

    mod file_tests {
        use super::*;

        #[tokio::test]
        async fn destroy_deletes_database_files() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("work.sqlite");
            let store = Store::open(&path).await.unwrap();
            let inbox = store.upsert_folder("INBOX", None).await.unwrap();
            store.reset_folder(inbox.id, 7).await.unwrap();
            let batch = SyncBatch {
                inserts: vec![message(1, "hello")],
                ..SyncBatch::default()
            };
            store.apply_batch(inbox.id, &batch, &checkpoint(1)).await.unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
            assert!(path.exists());

            let clone = store.clone();
            store.destroy().await.unwrap();
            assert!(!path.exists());
            assert!(!sibling(&path, "-wal").exists());
            assert!(!sibling(&path, "-shm").exists());
            assert!(clone.folders().await.is_err());
            assert!(!Store::delete_files(&path).await.unwrap());
        }

        #[tokio::test]
        async fn in_memory_has_no_files() {
            let store = Store::in_memory().await.unwrap();
            assert!(store.path().is_none());
            store.destroy().await.unwrap();
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn reset_runs_alongside_batches_on_another_folder() {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(&dir.path().join("work.sqlite")).await.unwrap();
            let inbox = store.upsert_folder("INBOX", None).await.unwrap();
            let archive = store.upsert_folder("Archive", None).await.unwrap();
            store.reset_folder(inbox.id, 7).await.unwrap();
            store.reset_folder(archive.id, 7).await.unwrap();

            for uid in 1..=20 {
                let seed = SyncBatch {
                    inserts: vec![message(uid, "old")],
                    ..SyncBatch::default()
                };
                store.apply_batch(inbox.id, &seed, &checkpoint(uid)).await.unwrap();
                let batch = SyncBatch {
                    inserts: vec![message(uid, "new")],
                    ..SyncBatch::default()
                };
                let cp = checkpoint(uid);
                let (reset, applied) = tokio::join!(
                    store.reset_folder(inbox.id, 8),
                    store.apply_batch(archive.id, &batch, &cp),
                );
                assert_eq!(reset.unwrap(), vec![MessageKey::new(inbox.id, uid)]);
                assert_eq!(applied.unwrap().inserted.len(), 1);
                store.reset_folder(inbox.id, 7).await.unwrap();
            }
            assert_eq!(store.checkpoint(archive.id).await.unwrap(), Some(checkpoint(20)));
            store.close().await;
        }
    }

    #[tokio::test]
    async fn link_fields_for_rebuild() {
        let (store, inbox) = store_with_inbox().await;
        let batch = SyncBatch {
            inserts: vec![message(2, "b"), message(1, "a")],
            ..SyncBatch::default()
        };
        store.apply_batch(inbox.id, &batch, &checkpoint(2)).await.unwrap();
        let links = store.link_fields().await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].key.uid, 1);
        assert_eq!(links[0].message_id.as_deref(), Some("1@example.com"));
        assert_eq!(links[0].parents, vec!["root@example.com"]);
        assert_eq!(links[0].subject.as_deref(), Some("a"));
    }

    #[test]
    fn fts_quoting() {
        assert_eq!(fts_expression("a \"b").as_deref(), Some("\"a\" \"\"\"b\""));
        assert_eq!(fts_expression(""), None);
    }
}
