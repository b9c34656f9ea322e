//! Row structs for each table and their conversions into `melon_core` types.
//!
//! Enum-like columns are stored as their snake_case strings; a row that fails
//! to parse surfaces as `sqlx::Error::Decode`.

pub mod annotation;
pub mod change_log;
pub mod dataset_state;
pub mod image;
pub mod job;
pub mod last_action;
pub mod model_entry;

use std::str::FromStr;

use melon_core::error::CoreError;

/// Parse a stored enum column.
pub(crate) fn decode<T>(value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = CoreError>,
{
    value.parse().map_err(|e: CoreError| sqlx::Error::Decode(Box::new(e)))
}
