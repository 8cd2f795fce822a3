use super::schema::Database;
use super::types::{DatabaseError, Entry, NewEntry};

const ENTRY_COLUMNS: &str = "id, feed_id, link, title, description, published_time";

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Get the entry keyed by `(feed_id, link)`, creating it from `new` if absent.
    ///
    /// The row is inserted with all of its content in one statement, so an
    /// entry is never visible half-written. The boolean is `true` when the row
    /// was created by this call; an existing row is returned unchanged, since
    /// entries are write-once.
    pub async fn get_or_create_entry(
        &self,
        feed_id: i64,
        new: &NewEntry<'_>,
    ) -> Result<(Entry, bool), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entries (feed_id, link, title, description, published_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, link) DO NOTHING
        "#,
        )
        .bind(feed_id)
        .bind(new.link)
        .bind(new.title)
        .bind(new.description)
        .bind(new.published_time)
        .execute(&self.pool)
        .await?;

        let entry = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? AND link = ?"
        ))
        .bind(feed_id)
        .bind(new.link)
        .fetch_one(&self.pool)
        .await?;

        Ok((entry, result.rows_affected() > 0))
    }

    /// Entries of one feed, newest first.
    ///
    /// Timestamps are stored as RFC 3339 text in arbitrary offsets, so they are
    /// ordered by instant through `julianday`, not as strings.
    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let entries = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? \
             ORDER BY julianday(published_time) DESC, id"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
