use super::schema::Database;
use super::types::{DatabaseError, Feed};

const FEED_COLUMNS: &str =
    "id, xml_url, title, link, description, published_time, last_polled_time, group_id";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Get the feed with this URL, creating it in `group_id` if it does not exist.
    ///
    /// An existing feed is returned unchanged: its group is never reassigned here.
    /// The boolean is `true` when the row was created by this call.
    pub async fn get_or_create_feed(
        &self,
        xml_url: &str,
        group_id: Option<i64>,
    ) -> Result<(Feed, bool), DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO feeds (xml_url, group_id) VALUES (?, ?) ON CONFLICT(xml_url) DO NOTHING",
        )
        .bind(xml_url)
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE xml_url = ?"
        ))
        .bind(xml_url)
        .fetch_one(&self.pool)
        .await?;

        Ok((feed, result.rows_affected() > 0))
    }

    pub async fn get_feed_by_url(&self, xml_url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE xml_url = ?"
        ))
        .bind(xml_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// All feeds, in the order they are polled (insertion order).
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Feeds belonging to `group_id`, or the top-level feeds when `None`.
    ///
    /// Ordered by title, then URL, so exports are stable.
    pub async fn feeds_in_group(&self, group_id: Option<i64>) -> Result<Vec<Feed>, DatabaseError> {
        // `IS` matches NULL as well as concrete ids
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE group_id IS ? ORDER BY title, xml_url"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Write every mutable column of `feed` back to its row.
    pub async fn save_feed(&self, feed: &Feed) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                title = ?,
                link = ?,
                description = ?,
                published_time = ?,
                last_polled_time = ?,
                group_id = ?
            WHERE id = ?
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(&feed.description)
        .bind(feed.published_time)
        .bind(feed.last_polled_time)
        .bind(feed.group_id)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unsubscribe. Entries go with the feed (ON DELETE CASCADE).
    ///
    /// Returns `false` when no feed has this URL.
    pub async fn delete_feed(&self, xml_url: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE xml_url = ?")
            .bind(xml_url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
