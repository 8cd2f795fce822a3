use super::schema::Database;
use super::types::{DatabaseError, Options};

impl Database {
    // ========================================================================
    // Options Operations
    // ========================================================================

    /// Load the singleton options row, recreating it with defaults if it is missing.
    pub async fn get_options(&self) -> Result<Options, DatabaseError> {
        sqlx::query("INSERT OR IGNORE INTO options (id, max_entries_saved) VALUES (1, ?)")
            .bind(Options::DEFAULT_MAX_ENTRIES_SAVED)
            .execute(&self.pool)
            .await?;

        let (max_entries_saved,): (i64,) =
            sqlx::query_as("SELECT max_entries_saved FROM options WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        Ok(Options { max_entries_saved })
    }

    /// Update the per-poll entry cap (UPSERT on the singleton row).
    pub async fn set_max_entries_saved(&self, max_entries_saved: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO options (id, max_entries_saved) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET max_entries_saved = excluded.max_entries_saved
        "#,
        )
        .bind(max_entries_saved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
