/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are keyed by time-ordered UUIDs so listings sort by creation.
pub type JobId = uuid::Uuid;

/// Truncate `value` to at most `max_chars` characters, appending `...` when
/// anything was cut. Operates on characters, never splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
