use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError, Options};

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // SEC-010: Create the database file with mode 0600 before SQLite does
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.exists()) {
                // If creation fails, SQLite reports the error at connect_with.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // Polling is sequential; 5 connections leaves room for a concurrent import or export.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS` / `OR IGNORE`, so re-running on an
    /// existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_groups (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                xml_url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                link TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                published_time TEXT,
                last_polled_time TEXT,
                group_id INTEGER REFERENCES feed_groups(id) ON DELETE SET NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                link TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                published_time TEXT NOT NULL,
                UNIQUE(feed_id, link)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Singleton: the CHECK constraint makes a second row impossible
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                max_entries_saved INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_group ON feeds(group_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published_time DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO options (id, max_entries_saved) VALUES (1, ?)")
            .bind(Options::DEFAULT_MAX_ENTRIES_SAVED)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
