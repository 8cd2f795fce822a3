use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedreader::config::Config;
use feedreader::feed::{opml, HttpFeedSource, Poller};
use feedreader::storage::{Database, DatabaseError};
use feedreader::util::validate_feed_url;

/// Get the config directory path (~/.config/feedreader/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedreader");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(
    name = "feedreader",
    about = "Polls RSS/Atom feeds into SQLite and exchanges subscriptions as OPML"
)]
struct Args {
    /// Config file (default: ~/.config/feedreader/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every subscribed feed once
    Poll {
        /// Print diagnostics to stdout as well as the log
        #[arg(short, long)]
        verbose: bool,
    },
    /// Subscribe to the feeds in an OPML file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write all subscriptions to an OPML file
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Subscribe to a single feed URL
    Subscribe { url: String },
    /// Remove a feed and its entries
    Unsubscribe { url: String },
    /// Show or change stored options
    Options {
        /// Cap on entries examined per feed per poll
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(i64).range(0..))]
        max_entries_saved: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedreader process is using the database. Please retry later.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Poll { verbose } => {
            let source = HttpFeedSource::new(&config.user_agent, config.fetch_settings())
                .context("Failed to create HTTP client")?;
            let poller = Poller::new(db.clone(), source, config.local_offset());
            let feeds = db.list_feeds().await.context("Failed to load feeds")?;

            let report = poller.poll_all(&feeds, verbose).await;
            if verbose {
                println!(
                    "Polled {} feeds: {} updated, {} stale, {} malformed, {} invalid, {} failed; {} new entries",
                    feeds.len(),
                    report.updated,
                    report.stale,
                    report.malformed,
                    report.invalid,
                    report.failed,
                    report.new_entries
                );
            }
        }
        Command::Import { file } => {
            // SEC-008: Canonicalize to resolve symlinks and prevent path traversal
            let canonical = file
                .canonicalize()
                .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
            if !std::fs::metadata(&canonical)?.is_file() {
                anyhow::bail!("Import path must be a regular file");
            }

            let summary = opml::import_file(&db, &canonical).await?;
            println!(
                "Imported {}: {} feeds added, {} already subscribed, {} groups created",
                canonical.display(),
                summary.feeds_created,
                summary.feeds_existing,
                summary.groups_created
            );
        }
        Command::Export { file } => {
            let summary = opml::export(&db, &file).await?;
            println!(
                "Exported {} feeds in {} groups to {}",
                summary.feeds,
                summary.groups,
                file.display()
            );
        }
        Command::Subscribe { url } => {
            let url = validate_feed_url(&url)
                .with_context(|| format!("Refusing to subscribe to {url}"))?;
            let (feed, created) = db
                .get_or_create_feed(url.as_str(), None)
                .await
                .context("Failed to subscribe")?;
            if created {
                println!("Subscribed to {}", feed.xml_url);
            } else {
                println!("Already subscribed to {}", feed.xml_url);
            }
        }
        Command::Unsubscribe { url } => {
            if db.delete_feed(&url).await.context("Failed to unsubscribe")? {
                println!("Unsubscribed from {url}");
            } else {
                println!("Not subscribed to {url}");
            }
        }
        Command::Options { max_entries_saved } => {
            if let Some(max) = max_entries_saved {
                db.set_max_entries_saved(max)
                    .await
                    .context("Failed to update options")?;
            }
            let options = db.get_options().await.context("Failed to load options")?;
            println!("max_entries_saved = {}", options.max_entries_saved);
        }
    }

    Ok(())
}
