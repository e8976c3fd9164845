//! Utility functions for timestamp handling.

pub mod timestamps;

pub use timestamps::{compact_local_stamp, format_iso8601, iso_timestamp, now_utc, Timestamp};
