//! Identifier and timestamp helpers.

mod ids;

pub use ids::{is_valid_id, new_request_id};

use chrono::Utc;

/// Returns the current UTC time as an RFC 3339 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}
