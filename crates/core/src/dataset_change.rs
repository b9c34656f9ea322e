//! Dataset change fingerprinting and one-shot operator notification.
//!
//! Every structural change to the dataset bumps a monotonically increasing
//! version. Operators have seen everything up to `seen_version`; a notice is
//! due while the fingerprint is ahead of it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{truncate_chars, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of change log entries kept as history.
pub const CHANGE_LOG_CAPACITY: i64 = 50;

/// Stored identifiers are truncated to this many characters.
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Identifiers shown in notices are truncated to this many characters.
pub const DISPLAY_IDENTIFIER_LEN: usize = 50;

// ---------------------------------------------------------------------------
// ChangeType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    ImageAdded,
    ImageRemoved,
    AnnotationAdded,
    AnnotationModified,
    FeaturesExtracted,
    ModelTrained,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageAdded => "image_added",
            Self::ImageRemoved => "image_removed",
            Self::AnnotationAdded => "annotation_added",
            Self::AnnotationModified => "annotation_modified",
            Self::FeaturesExtracted => "features_extracted",
            Self::ModelTrained => "model_trained",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image_added" => Ok(Self::ImageAdded),
            "image_removed" => Ok(Self::ImageRemoved),
            "annotation_added" => Ok(Self::AnnotationAdded),
            "annotation_modified" => Ok(Self::AnnotationModified),
            "features_extracted" => Ok(Self::FeaturesExtracted),
            "model_trained" => Ok(Self::ModelTrained),
            _ => Err(CoreError::Validation(format!("Unknown change type '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint & acknowledgement
// ---------------------------------------------------------------------------

/// The most recent structural change. Version 0 means nothing has changed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFingerprint {
    pub version: i64,
    pub last_change_type: Option<ChangeType>,
    pub last_change_identifier: Option<String>,
    pub items_affected: i64,
    pub timestamp: Option<Timestamp>,
}

impl DatasetFingerprint {
    pub fn initial() -> Self {
        Self {
            version: 0,
            last_change_type: None,
            last_change_identifier: None,
            items_affected: 0,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AckState {
    pub seen_version: i64,
}

/// A notice is due while the fingerprint is ahead of what was acknowledged.
pub fn should_notify(fingerprint: &DatasetFingerprint, ack: &AckState) -> bool {
    fingerprint.version > ack.seen_version
}

/// Mark everything up to the current fingerprint as seen. Idempotent.
pub fn acknowledge(fingerprint: &DatasetFingerprint, ack: &AckState) -> AckState {
    AckState {
        seen_version: ack.seen_version.max(fingerprint.version),
    }
}

/// Clamp a caller-supplied identifier to [`MAX_IDENTIFIER_LEN`].
pub fn normalize_identifier(identifier: &str) -> String {
    truncate_chars(identifier.trim(), MAX_IDENTIFIER_LEN)
}

// ---------------------------------------------------------------------------
// Presentation helpers
// ---------------------------------------------------------------------------

/// Relative age of `timestamp` at `now`, e.g. `"just now"`, `"5 minutes ago"`.
pub fn humanize_age(timestamp: Timestamp, now: Timestamp) -> String {
    let secs = (now - timestamp).num_seconds().max(0);
    let (value, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3_599 => (secs / 60, "minute"),
        3_600..=86_399 => (secs / 3_600, "hour"),
        86_400..=2_591_999 => (secs / 86_400, "day"),
        2_592_000..=31_535_999 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

/// `"annotation_added"` -> `"Annotation Added"`.
pub fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display-ready view of the current fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    pub type_display: String,
    pub identifier_display: String,
    pub items_affected: i64,
    pub time_ago: String,
    pub time_exact: String,
}

impl ChangeSummary {
    /// `None` until the first change is recorded.
    pub fn from_fingerprint(fp: &DatasetFingerprint, now: Timestamp) -> Option<Self> {
        let change_type = fp.last_change_type?;
        let timestamp = fp.timestamp?;
        Some(Self {
            type_display: title_case(change_type.as_str()),
            identifier_display: truncate_chars(
                fp.last_change_identifier.as_deref().unwrap_or_default(),
                DISPLAY_IDENTIFIER_LEN,
            ),
            items_affected: fp.items_affected,
            time_ago: humanize_age(timestamp, now),
            time_exact: timestamp.format("%-d %b, %H:%M").to_string(),
        })
    }
}

/// Response shape for the notification check.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotice {
    pub show_notification: bool,
    pub fingerprint: DatasetFingerprint,
    pub seen_version: i64,
    pub summary: Option<ChangeSummary>,
}

impl ChangeNotice {
    pub fn build(fingerprint: DatasetFingerprint, ack: AckState, now: Timestamp) -> Self {
        let show_notification = should_notify(&fingerprint, &ack);
        let summary = ChangeSummary::from_fingerprint(&fingerprint, now);
        Self {
            show_notification,
            fingerprint,
            seen_version: ack.seen_version,
            summary,
        }
    }
}
