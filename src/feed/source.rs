use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use super::fetcher::FetchError;
use crate::util::is_plain_text;

/// Where the poller gets feed documents from.
///
/// [`HttpFeedSource`](super::HttpFeedSource) is the production implementation;
/// tests substitute canned documents.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Retrieve and parse the document at `url`.
    ///
    /// Transport failures are `Err`. A document that was retrieved but does not
    /// parse as RSS or Atom is `Ok(FeedDocument::Malformed { .. })`.
    async fn fetch(&self, url: &str) -> Result<FeedDocument, FetchError>;
}

/// Outcome of retrieving a feed URL.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDocument {
    Parsed(ParsedFeed),
    Malformed { error: String },
}

/// Declared content type of a text construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDetail {
    pub content_type: String,
}

impl TextDetail {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }

    pub fn plain() -> Self {
        Self::new(crate::util::PLAIN_TEXT)
    }

    pub fn is_plain_text(&self) -> bool {
        is_plain_text(&self.content_type)
    }
}

/// Feed-level fields of a parsed document. Absent fields are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub title_detail: Option<TextDetail>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub description_detail: Option<TextDetail>,
    pub published: Option<DateTime<Utc>>,
    /// Entries in document order.
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub title_detail: Option<TextDetail>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub description_detail: Option<TextDetail>,
    pub published: Option<DateTime<Utc>>,
}

/// A field a feed or entry must carry to be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedField {
    Title,
    TitleDetail,
    Link,
    Description,
    DescriptionDetail,
}

impl FeedField {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedField::Title => "title",
            FeedField::TitleDetail => "title_detail",
            FeedField::Link => "link",
            FeedField::Description => "description",
            FeedField::DescriptionDetail => "description_detail",
        }
    }
}

impl fmt::Display for FeedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ParsedEntry {
    /// Every required entry field that is absent. The description detail is
    /// optional for entries.
    pub fn missing_fields(&self) -> Vec<FeedField> {
        [
            (FeedField::Title, self.title.is_none()),
            (FeedField::TitleDetail, self.title_detail.is_none()),
            (FeedField::Link, self.link.is_none()),
            (FeedField::Description, self.description.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, missing)| missing.then_some(field))
        .collect()
    }
}
