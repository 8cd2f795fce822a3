//! SQLite persistence for feeds, entries, groups and the options singleton.
//!
//! All access goes through [`Database`]; each submodule adds one family of
//! operations to it.

mod entries;
mod feeds;
mod groups;
mod options;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Entry, Feed, Group, NewEntry, Options};
