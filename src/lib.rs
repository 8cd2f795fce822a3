//! Polls RSS/Atom feeds into SQLite and exchanges subscriptions as OPML.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
