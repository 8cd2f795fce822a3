use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::{Database, DatabaseError, Feed, Group};

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

const OPML_TITLE: &str = "Feedreader Feeds";

/// Errors that can occur during OPML parsing and import.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One `<outline>` element and its nested outlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    /// `text` attribute, falling back to `title`.
    pub text: Option<String>,
    /// `xmlUrl` attribute. Blank values are treated as absent.
    pub xml_url: Option<String>,
    pub children: Vec<Outline>,
}

/// Counts from an [`import`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub feeds_created: usize,
    /// Feeds already subscribed; left untouched, including their group.
    pub feeds_existing: usize,
    pub groups_created: usize,
}

/// Counts from an [`export`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub feeds: usize,
    pub groups: usize,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses OPML content into the tree of `<outline>` elements under `<body>`.
///
/// # Security
///
/// XXE (XML External Entity) attacks are mitigated because `quick-xml` (0.37)
/// does not parse `<!ENTITY>` declarations. Custom entities cause
/// `EscapeError::UnrecognizedEntity` from `decode_and_unescape_value()`, which
/// surfaces as [`OpmlError::XmlParse`].
pub fn parse_outlines(content: &str) -> Result<Vec<Outline>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    // Open outlines, innermost last. Its length is the current nesting depth.
    let mut open: Vec<Outline> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                // SEC-003: Reject excessively nested OPMLs
                if open.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                open.push(parse_outline_attributes(&e, &reader)?);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = parse_outline_attributes(&e, &reader)?;
                attach(&mut open, &mut roots, outline);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                let outline = open.pop().ok_or_else(|| {
                    OpmlError::XmlParse("unexpected </outline>".to_string())
                })?;
                attach(&mut open, &mut roots, outline);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if !open.is_empty() {
        return Err(OpmlError::XmlParse(
            "unexpected end of document inside <outline>".to_string(),
        ));
    }

    Ok(roots)
}

fn attach(open: &mut [Outline], roots: &mut Vec<Outline>, outline: Outline) {
    match open.last_mut() {
        Some(parent) => parent.children.push(outline),
        None => roots.push(outline),
    }
}

fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Outline, OpmlError> {
    let mut text = None;
    let mut title = None;
    let mut xml_url = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"text" => &mut text,
            b"title" => &mut title,
            b"xmlUrl" => &mut xml_url,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        *slot = Some(value.into_owned());
    }

    Ok(Outline {
        text: text.or(title),
        xml_url: xml_url.filter(|url| !url.trim().is_empty()),
        children: Vec::new(),
    })
}

// ============================================================================
// Import
// ============================================================================

/// Import feed subscriptions from OPML content.
///
/// Outlines are walked depth-first in document order, each carrying the group
/// inherited from its ancestors:
///
/// - an outline with an `xmlUrl` is a feed, subscribed in the inherited group
///   unless a feed with that URL already exists (existing feeds are never
///   moved);
/// - an outline with a label and no URL is a group; its descendants inherit it;
/// - an outline with neither passes the inherited group on unchanged.
pub async fn import(db: &Database, content: &str) -> Result<ImportSummary, OpmlError> {
    let roots = parse_outlines(content)?;
    let mut summary = ImportSummary::default();

    // Explicit stack in place of recursion; children are pushed in reverse so
    // they are visited in document order.
    let mut pending: Vec<(&Outline, Option<i64>)> =
        roots.iter().rev().map(|outline| (outline, None)).collect();

    while let Some((outline, group_id)) = pending.pop() {
        let mut children_group = group_id;

        if let Some(url) = outline.xml_url.as_deref() {
            let (feed, created) = db.get_or_create_feed(url.trim(), group_id).await?;
            if created {
                tracing::debug!(url = %feed.xml_url, group_id = ?group_id, "Subscribed from OPML");
                summary.feeds_created += 1;
            } else {
                summary.feeds_existing += 1;
            }
        } else if let Some(name) = outline
            .text
            .as_deref()
            .and_then(Database::sanitize_group_name)
        {
            let (group, created) = db.get_or_create_group(&name).await?;
            if created {
                tracing::debug!(group = %group.name, "Created group from OPML");
                summary.groups_created += 1;
            }
            children_group = Some(group.id);
        }

        pending.extend(
            outline
                .children
                .iter()
                .rev()
                .map(|child| (child, children_group)),
        );
    }

    tracing::info!(
        feeds_created = summary.feeds_created,
        feeds_existing = summary.feeds_existing,
        groups_created = summary.groups_created,
        "OPML import complete"
    );
    Ok(summary)
}

/// Reads an OPML file from disk and imports it.
pub async fn import_file(db: &Database, path: &Path) -> Result<ImportSummary> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OPML file: {}", path.display()))?;
    let summary = import(db, &content)
        .await
        .with_context(|| format!("Failed to import OPML file: {}", path.display()))?;
    Ok(summary)
}

// ============================================================================
// Export
// ============================================================================

fn feed_outline(feed: &Feed) -> BytesStart<'_> {
    let text = if feed.title.is_empty() {
        feed.xml_url.as_str()
    } else {
        feed.title.as_str()
    };
    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("type", "rss"));
    outline.push_attribute(("text", text));
    outline.push_attribute(("xmlUrl", feed.xml_url.as_str()));
    outline
}

/// Renders the subscription hierarchy as an OPML 2.0 document.
///
/// Top-level feeds come first, then one outline per group wrapping its
/// member feeds. A feed's `text` is its title, or its URL if it has never
/// been polled.
pub fn render_opml(top_level: &[Feed], groups: &[(Group, Vec<Feed>)]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    // <head><title>Feedreader Feeds</title></head>
    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new(OPML_TITLE)))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for feed in top_level {
        writer
            .write_event(Event::Empty(feed_outline(feed)))
            .context("Failed to write outline element")?;
    }

    for (group, feeds) in groups {
        let mut group_outline = BytesStart::new("outline");
        group_outline.push_attribute(("text", group.name.as_str()));

        if feeds.is_empty() {
            writer
                .write_event(Event::Empty(group_outline))
                .context("Failed to write group outline")?;
            continue;
        }

        writer
            .write_event(Event::Start(group_outline))
            .context("Failed to write group outline")?;
        for feed in feeds {
            writer
                .write_event(Event::Empty(feed_outline(feed)))
                .context("Failed to write outline element")?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("outline")))
            .context("Failed to write group outline end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

/// Exports every subscription to an OPML file at `path`, atomically.
pub async fn export(db: &Database, path: &Path) -> Result<ExportSummary> {
    let top_level = db
        .feeds_in_group(None)
        .await
        .context("Failed to load top-level feeds")?;

    let mut groups = Vec::new();
    for group in db.list_groups().await.context("Failed to load groups")? {
        let feeds = db
            .feeds_in_group(Some(group.id))
            .await
            .with_context(|| format!("Failed to load feeds of group '{}'", group.name))?;
        groups.push((group, feeds));
    }

    let content = render_opml(&top_level, &groups)?;
    write_atomically(path, &content)?;

    let summary = ExportSummary {
        feeds: top_level.len() + groups.iter().map(|(_, feeds)| feeds.len()).sum::<usize>(),
        groups: groups.len(),
    };
    tracing::info!(
        path = %path.display(),
        feeds = summary.feeds,
        groups = summary.groups,
        "OPML export complete"
    );
    Ok(summary)
}

/// Writes to a temporary file in the same directory, syncs it to disk, then
/// renames it over `path`, so the destination is never left half-written.
fn write_atomically(path: &Path, content: &str) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    std::io::Write::write_all(&mut file, content.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to write OPML to temporary file '{}'", temp_path.display())
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to sync temporary file '{}' to disk", temp_path.display())
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
