//! Long-running job kinds, modes, lifecycle, and bounded log tails.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::ModelTask;
use crate::types::{truncate_chars, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of log lines retained per job.
pub const DEFAULT_LOG_TAIL_CAPACITY: usize = 200;

/// Default time an operation gets to acknowledge cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Consecutive failures of one kind before further triggers are refused.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Failure summaries are truncated to this many characters.
pub const MAX_SUMMARY_LEN: usize = 200;

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ExtractFeatures,
    TrainClassifier,
    TrainDetector,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        Self::ExtractFeatures,
        Self::TrainClassifier,
        Self::TrainDetector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractFeatures => "extract_features",
            Self::TrainClassifier => "train_classifier",
            Self::TrainDetector => "train_detector",
        }
    }

    /// The model task a training kind updates; `None` for extraction.
    pub fn model_task(&self) -> Option<ModelTask> {
        match self {
            Self::ExtractFeatures => None,
            Self::TrainClassifier => Some(ModelTask::Classifier),
            Self::TrainDetector => Some(ModelTask::Detector),
        }
    }

    /// Key under which the most recent run is remembered. Extraction runs
    /// are tracked per mode, training runs per kind.
    pub fn action_key(&self, mode: JobMode) -> String {
        match self {
            Self::ExtractFeatures => format!("{}_{}", self.as_str(), mode.as_str()),
            _ => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract_features" => Ok(Self::ExtractFeatures),
            "train_classifier" => Ok(Self::TrainClassifier),
            "train_detector" => Ok(Self::TrainDetector),
            _ => Err(CoreError::Validation(format!(
                "Invalid job kind '{s}'. Must be one of: extract_features, train_classifier, train_detector"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobMode
// ---------------------------------------------------------------------------

/// Passed through to the operation; the runner only validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Incremental,
    Overwrite,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "overwrite" => Ok(Self::Overwrite),
            _ => Err(CoreError::Validation(format!(
                "Invalid job mode '{s}'. Must be one of: incremental, overwrite"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// `pending -> running -> {succeeded | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(self, next: JobState) -> Result<JobState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::Conflict(format!(
                "Job cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(CoreError::Validation(format!("Unknown job state '{s}'"))),
        }
    }
}

/// The three ways a job can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<TerminalStatus> for JobState {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Succeeded => Self::Succeeded,
            TerminalStatus::Failed => Self::Failed,
            TerminalStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        JobState::from(*self).as_str()
    }
}

// ---------------------------------------------------------------------------
// LogTail
// ---------------------------------------------------------------------------

/// Ring buffer of the most recent log lines; the oldest line is evicted once
/// `capacity` is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_TAIL_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_TAIL_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Job views
// ---------------------------------------------------------------------------

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub mode: JobMode,
    pub state: JobState,
    pub progress_percent: u8,
    pub log_tail: Vec<String>,
    pub summary: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// Most recent terminal run of an action key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastAction {
    pub action_key: String,
    pub status: TerminalStatus,
    pub duration_secs: f64,
    pub summary: Option<String>,
    pub performed_at: Timestamp,
}

/// Collapse an error message into a single bounded line for operators.
pub fn failure_summary(message: &str) -> String {
    let single_line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&single_line, MAX_SUMMARY_LEN)
}
