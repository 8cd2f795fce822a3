use feed_rs::model;
use feed_rs::parser;

use super::source::{FeedDocument, ParsedEntry, ParsedFeed, TextDetail};

/// Parse raw RSS/Atom bytes.
///
/// Never fails: bytes that are not a feed become [`FeedDocument::Malformed`]
/// carrying the parser's message.
pub fn parse_document(bytes: &[u8]) -> FeedDocument {
    match parser::parse(bytes) {
        Ok(feed) => FeedDocument::Parsed(map_feed(feed)),
        Err(e) => FeedDocument::Malformed {
            error: e.to_string(),
        },
    }
}

fn map_feed(feed: model::Feed) -> ParsedFeed {
    let (title, title_detail) = split_text(feed.title);
    let (description, mut description_detail) = split_text(feed.description);

    // feed-rs labels an RSS channel description text/plain, but RSS carries
    // entity-encoded HTML there
    let is_rss = matches!(
        feed.feed_type,
        model::FeedType::RSS0 | model::FeedType::RSS1 | model::FeedType::RSS2
    );
    if is_rss && description.is_some() {
        description_detail = Some(TextDetail::new("text/html"));
    }

    ParsedFeed {
        title,
        title_detail,
        link: preferred_link(&feed.links),
        description,
        description_detail,
        // Only a declared publication date counts for staleness; `updated`
        // changes on every regeneration of some feeds.
        published: feed.published,
        entries: feed.entries.into_iter().map(map_entry).collect(),
    }
}

fn map_entry(entry: model::Entry) -> ParsedEntry {
    let (title, title_detail) = split_text(entry.title);

    let (description, description_detail) = match entry.summary {
        Some(summary) => split_text(Some(summary)),
        None => match entry.content {
            Some(content) => {
                let detail = TextDetail::new(content.content_type.essence().to_string());
                match content.body {
                    Some(body) => (Some(body), Some(detail)),
                    None => (None, None),
                }
            }
            None => (None, None),
        },
    };

    ParsedEntry {
        title,
        title_detail,
        link: preferred_link(&entry.links),
        description,
        description_detail,
        // `updated` is not a publication date; without `published` the
        // creation time is used
        published: entry.published,
    }
}

fn split_text(text: Option<model::Text>) -> (Option<String>, Option<TextDetail>) {
    match text {
        Some(text) => {
            let detail = TextDetail::new(text.content_type.essence().to_string());
            (Some(text.content), Some(detail))
        }
        None => (None, None),
    }
}

/// The alternate (human-facing) link, or the first link when none is marked.
fn preferred_link(links: &[model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}
