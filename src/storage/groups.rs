use super::schema::Database;
use super::types::{DatabaseError, Group};
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Group Operations
    // ========================================================================

    /// SEC-014: Strip control characters and surrounding whitespace.
    ///
    /// Returns `None` for names that are empty once cleaned.
    pub fn sanitize_group_name(name: &str) -> Option<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }

    /// Get the group with this name, creating it if it does not exist.
    ///
    /// The name is sanitized first; an empty name is rejected with
    /// `sqlx::Error::Protocol`. The boolean is `true` when the row was created.
    pub async fn get_or_create_group(&self, name: &str) -> Result<(Group, bool), DatabaseError> {
        let clean_name = Self::sanitize_group_name(name).ok_or_else(|| {
            DatabaseError::Other(sqlx::Error::Protocol(
                "Group name cannot be empty or whitespace-only".to_string(),
            ))
        })?;

        let result =
            sqlx::query("INSERT INTO feed_groups (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(&clean_name)
                .execute(&self.pool)
                .await?;

        let group =
            sqlx::query_as::<_, Group>("SELECT id, name FROM feed_groups WHERE name = ?")
                .bind(&clean_name)
                .fetch_one(&self.pool)
                .await?;

        Ok((group, result.rows_affected() > 0))
    }

    /// All groups, ordered by name.
    pub async fn list_groups(&self) -> Result<Vec<Group>, DatabaseError> {
        let groups = sqlx::query_as::<_, Group>("SELECT id, name FROM feed_groups ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_group() {
        let db = test_db().await;

        let (tech, created) = db.get_or_create_group("Tech").await.unwrap();
        assert!(created);
        assert_eq!(tech.name, "Tech");

        let (again, created) = db.get_or_create_group("Tech").await.unwrap();
        assert!(!created);
        assert_eq!(tech.id, again.id);

        assert_eq!(db.list_groups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_group_name_sanitized() {
        let db = test_db().await;

        let (group, _) = db.get_or_create_group("  News\x1b[31m  ").await.unwrap();
        assert_eq!(group.name, "News");

        let (same, created) = db.get_or_create_group("News").await.unwrap();
        assert!(!created);
        assert_eq!(same.id, group.id);
    }

    #[tokio::test]
    async fn test_empty_group_name_rejected() {
        let db = test_db().await;
        assert!(db.get_or_create_group("   ").await.is_err());
        assert!(db.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_groups_sorted() {
        let db = test_db().await;
        db.get_or_create_group("Zeta").await.unwrap();
        db.get_or_create_group("Alpha").await.unwrap();

        let names: Vec<String> = db
            .list_groups()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }
}
