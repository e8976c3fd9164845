//! Timestamp helpers for log records, events and run identifiers.

use chrono::{DateTime, Local, Utc};

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 string with microseconds:
/// `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// Strings produced by this function sort lexicographically in time order.
///
/// # Examples
///
/// ```
/// use stepflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Formats a timestamp the same way as [`iso_timestamp`].
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Local wall-clock stamp used in generated workflow ids: `YYYYmmdd-HHMMSS`.
#[must_use]
pub fn compact_local_stamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}
