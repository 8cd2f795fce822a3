//! Integration tests for the feed lifecycle: import, poll, re-poll, export, unsubscribe.
//!
//! Each test creates its own in-memory SQLite database and a wiremock server
//! standing in for the feed hosts, so the HTTP adapter, the feed-rs mapping,
//! the poller and the store are exercised together.

use chrono::{FixedOffset, Utc};
use feedreader::feed::{opml, FetchSettings, HttpFeedSource, PollReport, Poller};
use feedreader::storage::Database;
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example News</title>
    <link>https://news.example.com/</link>
    <description>Daily news</description>
    <pubDate>Mon, 06 Sep 2021 16:45:00 GMT</pubDate>
    <item>
        <title>First story</title>
        <link>https://news.example.com/1</link>
        <description>One</description>
        <pubDate>Mon, 06 Sep 2021 12:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Second story</title>
        <link>https://news.example.com/2</link>
        <description>Two</description>
    </item>
</channel></rss>"#;

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Example Blog</title>
    <subtitle>Posts</subtitle>
    <link href="https://blog.example.com/"/>
    <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
    <updated>2021-09-06T16:45:00Z</updated>
    <entry>
        <title>Hello</title>
        <link href="https://blog.example.com/hello"/>
        <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
        <updated>2021-09-05T10:00:00Z</updated>
        <content type="html">&lt;p&gt;Hi there&lt;/p&gt;</content>
    </entry>
</feed>"#;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn test_poller(db: &Database) -> Poller<HttpFeedSource> {
    let source = HttpFeedSource::new(
        "feedreader-test",
        FetchSettings {
            retry_base_delay: Duration::from_millis(1),
            ..FetchSettings::default()
        },
    )
    .unwrap();
    Poller::new(db.clone(), source, FixedOffset::east_opt(3600).unwrap())
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn subscriptions(server: &MockServer) -> String {
    format!(
        r#"<?xml version="1.0"?>
<opml version="2.0">
  <body>
    <outline type="rss" text="News" xmlUrl="{uri}/news.xml"/>
    <outline text="Blogs">
      <outline type="rss" text="Blog" xmlUrl="{uri}/blog.xml"/>
      <outline type="rss" text="Gone" xmlUrl="{uri}/gone.xml"/>
    </outline>
  </body>
</opml>"#,
        uri = server.uri()
    )
}

// ============================================================================
// Import + Poll
// ============================================================================

#[tokio::test]
async fn test_import_then_poll_ingests_entries() {
    let server = MockServer::start().await;
    serve(&server, "/news.xml", RSS).await;
    serve(&server, "/blog.xml", ATOM).await;
    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let db = test_db().await;
    let imported = opml::import(&db, &subscriptions(&server)).await.unwrap();
    assert_eq!(imported.feeds_created, 3);
    assert_eq!(imported.groups_created, 1);

    let poller = test_poller(&db);
    let feeds = db.list_feeds().await.unwrap();
    let report = poller.poll_all(&feeds, false).await;
    assert_eq!(
        report,
        PollReport {
            updated: 2,
            stale: 0,
            malformed: 0,
            invalid: 0,
            failed: 1,
            new_entries: 3,
        }
    );

    let news = db
        .get_feed_by_url(&format!("{}/news.xml", server.uri()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(news.title, "Example News");
    assert_eq!(news.link, "https://news.example.com/");
    assert_eq!(news.description, "Daily news");
    assert!(news.last_polled_time.is_some());
    let published = news.published_time.unwrap();
    assert_eq!(published.offset(), &FixedOffset::east_opt(3600).unwrap());
    assert_eq!(published.with_timezone(&Utc).to_rfc3339(), "2021-09-06T16:45:00+00:00");

    let blog = db
        .get_feed_by_url(&format!("{}/blog.xml", server.uri()))
        .await
        .unwrap()
        .unwrap();
    let entries = db.entries_for_feed(blog.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Hello");
    // HTML content is stored verbatim
    assert_eq!(entries[0].description, "<p>Hi there</p>");

    let gone = db
        .get_feed_by_url(&format!("{}/gone.xml", server.uri()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gone.title, "");
    assert_eq!(gone.last_polled_time, None);
}

#[tokio::test]
async fn test_repoll_of_unchanged_feed_is_stale() {
    let server = MockServer::start().await;
    serve(&server, "/news.xml", RSS).await;

    let db = test_db().await;
    let (feed, _) = db
        .get_or_create_feed(&format!("{}/news.xml", server.uri()), None)
        .await
        .unwrap();
    let poller = test_poller(&db);

    let first = poller.poll_all(&[feed], false).await;
    assert_eq!(first.new_entries, 2);

    let feeds = db.list_feeds().await.unwrap();
    let before = db.entries_for_feed(feeds[0].id).await.unwrap();

    let second = poller.poll_all(&feeds, false).await;
    assert_eq!(second.stale, 1);
    assert_eq!(second.new_entries, 0);
    assert_eq!(db.entries_for_feed(feeds[0].id).await.unwrap(), before);
}

#[tokio::test]
async fn test_malformed_document_leaves_feed_untouched() {
    let server = MockServer::start().await;
    serve(&server, "/page", "<html><body>Not a feed</body></html>").await;

    let db = test_db().await;
    let (feed, _) = db
        .get_or_create_feed(&format!("{}/page", server.uri()), None)
        .await
        .unwrap();

    let report = test_poller(&db).poll_all(&[feed.clone()], false).await;
    assert_eq!(report.malformed, 1);

    let after = db.get_feed_by_url(&feed.xml_url).await.unwrap().unwrap();
    assert_eq!(after, feed);
}

// ============================================================================
// Export + Unsubscribe
// ============================================================================

#[tokio::test]
async fn test_export_after_poll_uses_feed_titles() {
    let server = MockServer::start().await;
    serve(&server, "/news.xml", RSS).await;
    serve(&server, "/blog.xml", ATOM).await;

    let db = test_db().await;
    opml::import(&db, &subscriptions(&server)).await.unwrap();
    let feeds = db.list_feeds().await.unwrap();
    test_poller(&db).poll_all(&feeds, false).await;

    let dir = std::env::temp_dir().join("feedreader_lifecycle_export");
    std::fs::create_dir_all(&dir).unwrap();
    let out = dir.join("feeds.opml");

    let summary = opml::export(&db, &out).await.unwrap();
    assert_eq!(summary.feeds, 3);
    assert_eq!(summary.groups, 1);

    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.contains(r#"text="Example News""#));
    assert!(content.contains(r#"text="Example Blog""#));
    // Never polled successfully: falls back to the URL
    assert!(content.contains(&format!(r#"text="{}/gone.xml""#, server.uri())));

    // Re-importing the export into a fresh store reproduces the hierarchy
    let fresh = test_db().await;
    opml::import(&fresh, &content).await.unwrap();
    let groups = fresh.list_groups().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "Blogs");
    assert_eq!(fresh.feeds_in_group(Some(groups[0].id)).await.unwrap().len(), 2);
    assert_eq!(fresh.feeds_in_group(None).await.unwrap().len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_unsubscribe_removes_entries() {
    let server = MockServer::start().await;
    serve(&server, "/news.xml", RSS).await;

    let db = test_db().await;
    let url = format!("{}/news.xml", server.uri());
    let (feed, _) = db.get_or_create_feed(&url, None).await.unwrap();
    test_poller(&db).poll_all(&[feed.clone()], false).await;
    assert_eq!(db.entries_for_feed(feed.id).await.unwrap().len(), 2);

    assert!(db.delete_feed(&url).await.unwrap());
    assert!(db.get_feed_by_url(&url).await.unwrap().is_none());
    assert!(db.entries_for_feed(feed.id).await.unwrap().is_empty());
    assert!(!db.delete_feed(&url).await.unwrap());
}
