//! Progress events emitted by running jobs and the snapshot observers catch
//! up from.

use serde::{Deserialize, Serialize};

use crate::job::{JobState, LogTail, TerminalStatus};

/// Message type sent to stream observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        percent: u8,
        message: String,
    },
    Log {
        line: String,
    },
    Terminal {
        status: TerminalStatus,
        summary: Option<String>,
    },
    /// Synthetic first event for a new subscriber.
    CatchUp {
        state: JobState,
        percent: u8,
        log_tail: Vec<String>,
        summary: Option<String>,
    },
}

impl ProgressEvent {
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self::Log { line: line.into() }
    }

    pub fn terminal(status: TerminalStatus, summary: Option<String>) -> Self {
        Self::Terminal { status, summary }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Live progress state of one job, folded from its event stream.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub state: JobState,
    pub percent: u8,
    pub log_tail: LogTail,
    pub summary: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: JobState::Running,
            percent: 0,
            log_tail: LogTail::new(log_capacity),
            summary: None,
        }
    }

    /// Fold one event into the snapshot. Ticks update the percentage and land
    /// in the log tail; a terminal event records the outcome.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Progress { percent, message } => {
                self.percent = (*percent).min(100);
                if !message.is_empty() {
                    self.log_tail.push(format!("[{percent:>3}%] {message}"));
                }
            }
            ProgressEvent::Log { line } => self.log_tail.push(line.clone()),
            ProgressEvent::Terminal { status, summary } => {
                self.state = (*status).into();
                self.summary = summary.clone();
                if *status == TerminalStatus::Succeeded {
                    self.percent = 100;
                }
            }
            ProgressEvent::CatchUp { .. } => {}
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn catch_up(&self) -> ProgressEvent {
        ProgressEvent::CatchUp {
            state: self.state,
            percent: self.percent,
            log_tail: self.log_tail.to_vec(),
            summary: self.summary.clone(),
        }
    }
}

/// Where a running operation reports its progress.
pub trait ProgressSink: Send + Sync {
    /// Report overall completion (`0..=100`) with a short message.
    fn progress(&self, percent: u8, message: &str);

    /// Append a free-form log line.
    fn log(&self, line: &str);
}

/// Maps a sub-operation's `0..=100` progress into the `[start, end)` slice of
/// the parent's range. Used when one job runs several models in sequence.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressSink,
    start: f64,
    span: f64,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink, index: usize, count: usize) -> Self {
        let count = count.max(1) as f64;
        Self {
            inner,
            start: index as f64 * 100.0 / count,
            span: 100.0 / count,
        }
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn progress(&self, percent: u8, message: &str) {
        let scaled = self.start + self.span * f64::from(percent.min(100)) / 100.0;
        self.inner.progress(scaled.floor().min(100.0) as u8, message);
    }

    fn log(&self, line: &str) {
        self.inner.log(line);
    }
}
