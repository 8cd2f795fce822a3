use chrono::{DateTime, FixedOffset};
use sqlx::FromRow;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process (usually a concurrent poll run) holds the database lock
    #[error("Another feedreader process appears to be using the database. Please retry later.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Records
// ============================================================================

/// A subscribed feed, identified by the URL it is fetched from.
///
/// `title`, `link` and `description` are empty until the first successful poll.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Feed {
    pub id: i64,
    pub xml_url: String,
    pub title: String,
    pub link: String,
    pub description: String,
    /// Feed-level published timestamp from the last accepted poll. Only moves forward.
    pub published_time: Option<DateTime<FixedOffset>>,
    pub last_polled_time: Option<DateTime<FixedOffset>>,
    /// `None` for top-level feeds.
    pub group_id: Option<i64>,
}

/// One article of a feed. Written once when first seen, never updated.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub link: String,
    pub title: String,
    pub description: String,
    /// The row's creation time when the document carries no date.
    pub published_time: DateTime<FixedOffset>,
}

/// Content of an entry that is not stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry<'a> {
    pub link: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub published_time: DateTime<FixedOffset>,
}

/// A named folder of feeds.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// The singleton options row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Cap on entries examined per poll (see `Poller::poll` for the exact cutoff).
    pub max_entries_saved: i64,
}

impl Options {
    pub const DEFAULT_MAX_ENTRIES_SAVED: i64 = 100;
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_entries_saved: Self::DEFAULT_MAX_ENTRIES_SAVED,
        }
    }
}
