//! Feed ingestion and subscription exchange.
//!
//! - **Source**: the [`FeedSource`] seam and the parsed document model
//! - **Fetching**: HTTP retrieval with retry, backoff and size limits
//! - **Parsing**: RSS/Atom mapping via `feed-rs`
//! - **Polling**: validation, deduplication and persistence of new entries
//! - **OPML**: import and export of the feed/group hierarchy
//!
//! # Example
//!
//! ```ignore
//! use feedreader::feed::{HttpFeedSource, Poller};
//!
//! let source = HttpFeedSource::new(&config.user_agent, config.fetch_settings())?;
//! let poller = Poller::new(db.clone(), source, config.local_offset());
//! let report = poller.poll_all(&db.list_feeds().await?, false).await;
//! ```

mod fetcher;
pub mod opml;
mod parser;
mod poller;
mod source;

pub use fetcher::{FetchError, FetchSettings, HttpFeedSource};
pub use opml::{ExportSummary, ImportSummary, OpmlError};
pub use parser::parse_document;
pub use poller::{PollError, PollOutcome, PollReport, Poller};
pub use source::{FeedDocument, FeedField, FeedSource, ParsedEntry, ParsedFeed, TextDetail};
