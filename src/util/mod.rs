//! Utility functions shared by the poller, the OPML engine and the CLI.
//!
//! - **Text**: HTML escaping of plain-text feed content, content-type checks,
//!   control-character stripping
//! - **URL validation**: SSRF guard for new subscriptions

mod text;
mod url_validator;

pub use text::{escape_html, is_plain_text, strip_control_chars, PLAIN_TEXT};
pub use url_validator::{validate_feed_url, UrlValidationError};
