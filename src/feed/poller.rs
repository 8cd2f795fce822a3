//! Feed ingestion: fetch one feed, validate it, and commit what is new.
//!
//! Data-quality problems in a document (malformed XML, missing fields, blank
//! entry titles) are logged and reported as a [`PollOutcome`]; only transport
//! and store failures become a [`PollError`].

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;

use super::fetcher::FetchError;
use super::source::{FeedDocument, FeedField, FeedSource, ParsedEntry, ParsedFeed, TextDetail};
use crate::storage::{Database, DatabaseError, Feed, NewEntry, Options};
use crate::util::escape_html;

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The document did not parse; nothing was written.
    Malformed,
    /// The feed-level published timestamp is not newer than the stored one.
    Stale,
    /// A required feed-level field is absent; nothing was written.
    MissingField(FeedField),
    /// Feed metadata was saved and `new_entries` entries were created.
    Updated { new_entries: usize },
}

/// Tally of a [`Poller::poll_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub updated: usize,
    pub stale: usize,
    pub malformed: usize,
    /// Feeds rejected for a missing required field.
    pub invalid: usize,
    /// Feeds whose poll returned an error.
    pub failed: usize,
    pub new_entries: usize,
}

impl PollReport {
    fn record(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Malformed => self.malformed += 1,
            PollOutcome::Stale => self.stale += 1,
            PollOutcome::MissingField(_) => self.invalid += 1,
            PollOutcome::Updated { new_entries } => {
                self.updated += 1;
                self.new_entries += new_entries;
            }
        }
    }
}

/// Required feed-level fields, taken out of a [`ParsedFeed`].
struct FeedHeader {
    title: String,
    title_detail: TextDetail,
    link: String,
    description: String,
    description_detail: TextDetail,
}

impl FeedHeader {
    /// Fails with the first absent field, in the order they are checked.
    fn take(parsed: &mut ParsedFeed) -> Result<Self, FeedField> {
        Ok(Self {
            title: parsed.title.take().ok_or(FeedField::Title)?,
            title_detail: parsed.title_detail.take().ok_or(FeedField::TitleDetail)?,
            link: parsed.link.take().ok_or(FeedField::Link)?,
            description: parsed.description.take().ok_or(FeedField::Description)?,
            description_detail: parsed
                .description_detail
                .take()
                .ok_or(FeedField::DescriptionDetail)?,
        })
    }
}

fn warn(verbose: bool, message: &str) {
    tracing::warn!("{message}");
    if verbose {
        println!("{message}");
    }
}

fn error(verbose: bool, message: &str) {
    tracing::error!("{message}");
    if verbose {
        println!("{message}");
    }
}

/// Escape `text` if `detail` declares it plain text, otherwise keep it verbatim.
fn sanitize_by_detail(text: &str, detail: &TextDetail) -> String {
    if detail.is_plain_text() {
        escape_html(text)
    } else {
        text.to_string()
    }
}

/// Polls feeds from a [`FeedSource`] into the [`Database`].
pub struct Poller<S> {
    db: Database,
    source: S,
    offset: FixedOffset,
}

impl<S: FeedSource> Poller<S> {
    /// `offset` is the local timezone every stored timestamp is expressed in.
    pub fn new(db: Database, source: S, offset: FixedOffset) -> Self {
        Self { db, source, offset }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Poll every feed in order, one at a time.
    ///
    /// A feed whose poll fails is logged and counted; the run continues with
    /// the next feed.
    pub async fn poll_all(&self, feeds: &[Feed], verbose: bool) -> PollReport {
        let mut report = PollReport::default();

        for feed in feeds {
            match self.poll(feed, verbose).await {
                Ok(outcome) => {
                    tracing::debug!(url = %feed.xml_url, ?outcome, "Polled feed");
                    report.record(outcome);
                }
                Err(e) => {
                    tracing::error!(url = %feed.xml_url, error = %e, "Failed to poll feed");
                    if verbose {
                        println!("Failed to poll {}: {}", feed.xml_url, e);
                    }
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            feeds = feeds.len(),
            updated = report.updated,
            new_entries = report.new_entries,
            failed = report.failed,
            "Poll complete"
        );
        report
    }

    /// Read through a feed looking for new entries.
    ///
    /// The feed row is only written once the document has passed the
    /// staleness and required-field checks. Entries are examined in document
    /// order while their zero-based index is at most `max_entries_saved`, so
    /// up to `max_entries_saved + 1` entries are considered. Each new entry is
    /// written once and never updated by later polls.
    pub async fn poll(&self, feed: &Feed, verbose: bool) -> Result<PollOutcome, PollError> {
        let options = self.db.get_options().await?;

        let mut parsed = match self.source.fetch(&feed.xml_url).await? {
            FeedDocument::Parsed(parsed) => parsed,
            FeedDocument::Malformed { error } => {
                warn(verbose, &format!("Malformed feed, {}: {}", feed.xml_url, error));
                return Ok(PollOutcome::Malformed);
            }
        };

        let mut feed = feed.clone();

        if let Some(published) = parsed.published {
            let published = published.with_timezone(&self.offset);
            if feed.published_time.is_some_and(|stored| stored >= published) {
                tracing::debug!(
                    url = %feed.xml_url,
                    %published,
                    "Feed not updated since last poll"
                );
                return Ok(PollOutcome::Stale);
            }
            feed.published_time = Some(published);
        }

        let header = match FeedHeader::take(&mut parsed) {
            Ok(header) => header,
            Err(field) => {
                error(verbose, &format!("Feed \"{}\" has no {}", feed.xml_url, field));
                return Ok(PollOutcome::MissingField(field));
            }
        };

        feed.title = sanitize_by_detail(&header.title, &header.title_detail);
        feed.link = header.link;
        feed.description = sanitize_by_detail(&header.description, &header.description_detail);
        feed.last_polled_time = Some(self.now());
        self.db.save_feed(&feed).await?;

        if verbose {
            println!("{} entries to process in {}", parsed.entries.len(), feed.title);
        }

        let new_entries = self
            .ingest_entries(&feed, parsed.entries, options, verbose)
            .await?;

        Ok(PollOutcome::Updated { new_entries })
    }

    async fn ingest_entries(
        &self,
        feed: &Feed,
        entries: Vec<ParsedEntry>,
        options: Options,
        verbose: bool,
    ) -> Result<usize, PollError> {
        let mut created_count = 0;

        for (index, entry) in entries.into_iter().enumerate() {
            if index as i64 > options.max_entries_saved {
                break;
            }

            let missing = entry.missing_fields();
            if !missing.is_empty() {
                let link = entry.link.as_deref().unwrap_or_default();
                for field in missing {
                    error(verbose, &format!("Entry \"{link}\" has no {field}"));
                }
                continue;
            }

            let ParsedEntry {
                title: Some(title),
                title_detail: Some(title_detail),
                link: Some(link),
                description: Some(description),
                description_detail,
                published,
            } = entry
            else {
                continue;
            };

            if title.is_empty() {
                warn(verbose, &format!("Entry \"{link}\" has a blank title"));
                continue;
            }

            // Without a document date the entry is stamped with its creation time
            let now = Utc::now();
            let published_time = match published {
                Some(published) if published < now => published,
                _ => now,
            }
            .with_timezone(&self.offset);

            let title = sanitize_by_detail(&title, &title_detail);
            // Entries often lack a description detail; their text is escaped
            let description = match description_detail {
                Some(detail) if !detail.is_plain_text() => description,
                _ => escape_html(&description),
            };

            let new_entry = NewEntry {
                link: &link,
                title: &title,
                description: &description,
                published_time,
            };
            let (_, created) = self.db.get_or_create_entry(feed.id, &new_entry).await?;
            if created {
                created_count += 1;
            }
        }

        Ok(created_count)
    }
}
