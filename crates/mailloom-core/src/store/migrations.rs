//! Versioned schema migrations.
//!
//! The version lives in `PRAGMA user_version`. Pending steps run in one
//! transaction together with the version bump, so a store is either fully
//! migrated or untouched.

use sqlx::SqlitePool;

use crate::{Error, Result};

/// Schema version this build writes.
pub const SCHEMA_VERSION: i64 = 2;

/// Oldest on-disk version the steps below can upgrade.
const OLDEST_MIGRATABLE: i64 = 0;

/// Step `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: [&str; 2] = [
    r"
    CREATE TABLE folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        uid_validity INTEGER,
        highest_uid INTEGER NOT NULL DEFAULT 0,
        special_use TEXT
    );

    CREATE TABLE messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
        uid INTEGER NOT NULL,
        modseq INTEGER,
        flags TEXT NOT NULL DEFAULT '',
        size INTEGER,
        subject TEXT,
        from_addr TEXT NOT NULL DEFAULT '',
        to_addrs TEXT NOT NULL DEFAULT '',
        cc_addrs TEXT NOT NULL DEFAULT '',
        date INTEGER,
        message_id TEXT,
        in_reply_to TEXT NOT NULL DEFAULT '',
        refs TEXT NOT NULL DEFAULT '',
        UNIQUE(folder_id, uid)
    );
    CREATE INDEX idx_messages_message_id ON messages(message_id);
    CREATE INDEX idx_messages_folder_date ON messages(folder_id, date);

    CREATE TABLE bodies (
        message_id INTEGER PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
        raw BLOB NOT NULL,
        text TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE checkpoints (
        folder_id INTEGER PRIMARY KEY REFERENCES folders(id) ON DELETE CASCADE,
        uid_validity INTEGER NOT NULL,
        highest_modseq INTEGER,
        highest_uid INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );
    ",
    r"
    CREATE VIRTUAL TABLE messages_fts USING fts5(subject, sender, recipients, body);

    INSERT INTO messages_fts (rowid, subject, sender, recipients, body)
    SELECT m.id, m.subject, m.from_addr, m.to_addrs || ' ' || m.cc_addrs, COALESCE(b.text, '')
    FROM messages m LEFT JOIN bodies b ON b.message_id = m.id;

    CREATE TRIGGER messages_fts_insert AFTER INSERT ON messages BEGIN
        INSERT INTO messages_fts (rowid, subject, sender, recipients, body)
        VALUES (new.id, new.subject, new.from_addr, new.to_addrs || ' ' || new.cc_addrs, '');
    END;

    CREATE TRIGGER messages_fts_delete AFTER DELETE ON messages BEGIN
        DELETE FROM messages_fts WHERE rowid = old.id;
    END;

    CREATE TRIGGER bodies_fts_insert AFTER INSERT ON bodies BEGIN
        UPDATE messages_fts SET body = new.text WHERE rowid = new.message_id;
    END;

    CREATE TRIGGER bodies_fts_update AFTER UPDATE OF text ON bodies BEGIN
        UPDATE messages_fts SET body = new.text WHERE rowid = new.message_id;
    END;
    ",
];

/// Brings the schema to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`Error::MigrationRequired`] for a store written by a newer
/// build or older than any known upgrade path, and [`Error::Store`] if a
/// step fails (nothing is changed in that case).
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<()> {
    let found: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    let required = || Error::MigrationRequired {
        found,
        supported: SCHEMA_VERSION,
    };
    if !(OLDEST_MIGRATABLE..=SCHEMA_VERSION).contains(&found) {
        return Err(required());
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let start = usize::try_from(found).map_err(|_| required())?;
    let mut tx = pool.begin().await?;
    for step in &MIGRATIONS[start..] {
        sqlx::raw_sql(step).execute(&mut *tx).await?;
    }
    sqlx::raw_sql(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(from = found, to = SCHEMA_VERSION, "store migrated");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn version(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("PRAGMA user_version").fetch_one(pool).await.unwrap()
    }

    #[test]
    fn version_matches_steps() {
        assert_eq!(usize::try_from(SCHEMA_VERSION).unwrap(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn fresh_store_is_migrated_once() {
        let pool = pool().await;
        migrate(&pool).await.unwrap();
        assert_eq!(version(&pool).await, SCHEMA_VERSION);
        // A second open is a no-op rather than a failed CREATE TABLE.
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn partial_upgrade_runs_remaining_steps() {
        let pool = pool().await;
        sqlx::raw_sql(MIGRATIONS[0]).execute(&pool).await.unwrap();
        sqlx::raw_sql("PRAGMA user_version = 1").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO folders (path) VALUES ('INBOX')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO messages (folder_id, uid, subject) VALUES (1, 1, 'quarterly report')")
            .execute(&pool)
            .await
            .unwrap();

        migrate(&pool).await.unwrap();
        assert_eq!(version(&pool).await, 2);
        let hits: i64 = sqlx::query_scalar("SELECT count(*) FROM messages_fts WHERE messages_fts MATCH 'quarterly'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn newer_store_is_refused() {
        let pool = pool().await;
        sqlx::raw_sql("PRAGMA user_version = 99").execute(&pool).await.unwrap();
        let err = migrate(&pool).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MigrationRequired {
                found: 99,
                supported: SCHEMA_VERSION
            }
        ));
    }

    #[tokio::test]
    async fn failed_step_leaves_store_untouched() {
        let pool = pool().await;
        // Occupy a name the first step creates.
        sqlx::raw_sql("CREATE TABLE checkpoints (x INTEGER)").execute(&pool).await.unwrap();
        assert!(migrate(&pool).await.is_err());
        assert_eq!(version(&pool).await, 0);
        let folders: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'folders'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(folders, 0);
    }
}
