//! In-process progress fan-out backed by one `tokio::sync::broadcast` channel
//! per job.
//!
//! The broadcaster also folds every published event into a
//! [`ProgressSnapshot`], so a subscriber that joins late first receives a
//! synthetic catch-up event and then the live stream, with nothing missed or
//! duplicated in between.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use melon_core::job::DEFAULT_LOG_TAIL_CAPACITY;
use melon_core::progress::{ProgressEvent, ProgressSnapshot};
use melon_core::types::JobId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Events a subscriber may fall behind by before it is disconnected.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

struct JobChannel {
    sender: broadcast::Sender<ProgressEvent>,
    snapshot: ProgressSnapshot,
}

/// Publish/subscribe hub keyed by job id. Shared via `Arc`.
///
/// Publishing never blocks: a subscriber that lags more than `buffer` events
/// behind loses its stream and has to resubscribe for a fresh catch-up.
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<JobId, JobChannel>>,
    buffer: usize,
    log_capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(buffer: usize, log_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            log_capacity,
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<JobId, JobChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a job. Calling it again for the same job is a no-op.
    pub fn open(&self, job_id: JobId) {
        self.channels().entry(job_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.buffer);
            JobChannel {
                sender,
                snapshot: ProgressSnapshot::new(self.log_capacity),
            }
        });
    }

    /// Fold `event` into the job's snapshot and deliver it to current
    /// subscribers.
    ///
    /// Returns `false` when the job is unknown or already finished; such
    /// events are dropped.
    pub fn publish(&self, job_id: JobId, event: ProgressEvent) -> bool {
        if matches!(event, ProgressEvent::CatchUp { .. }) {
            tracing::debug!(%job_id, "Ignoring externally published catch-up event");
            return false;
        }
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(&job_id) else {
            tracing::debug!(%job_id, "Progress event for unknown job dropped");
            return false;
        };
        if channel.snapshot.is_terminal() {
            tracing::debug!(%job_id, "Progress event after terminal dropped");
            return false;
        }
        channel.snapshot.apply(&event);
        // Ignore the SendError: it only means there are zero receivers.
        let _ = channel.sender.send(event);
        true
    }

    /// Subscribe to a job's events, starting with a catch-up of its current
    /// progress. `None` if the job is not tracked.
    pub fn subscribe(&self, job_id: JobId) -> Option<Subscription> {
        let channels = self.channels();
        let channel = channels.get(&job_id)?;
        // Snapshot and receiver are taken under the same lock as `publish`.
        Some(Subscription {
            job_id,
            done: false,
            terminal_in_catch_up: channel.snapshot.is_terminal(),
            catch_up: Some(channel.snapshot.catch_up()),
            receiver: channel.sender.subscribe(),
        })
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.channels().get(&job_id).map(|c| c.snapshot.clone())
    }

    /// Live subscribers of a job. Dropped subscriptions are not counted.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.channels()
            .get(&job_id)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Stop tracking a job. Open subscriptions see their stream end.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.channels().remove(&job_id).is_some()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_LOG_TAIL_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One observer's ordered view of a job: the catch-up event, then live
/// events up to and including the terminal one.
pub struct Subscription {
    job_id: JobId,
    catch_up: Option<ProgressEvent>,
    terminal_in_catch_up: bool,
    receiver: broadcast::Receiver<ProgressEvent>,
    done: bool,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` once the stream has ended (terminal delivered,
    /// job removed, or this subscriber fell too far behind).
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.catch_up.take() {
            self.done = self.terminal_in_catch_up;
            return Some(event);
        }
        if self.done {
            return None;
        }
        match self.receiver.recv().await {
            Ok(event) => {
                self.done = event.is_terminal();
                Some(event)
            }
            Err(RecvError::Closed) => {
                self.done = true;
                None
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(job_id = %self.job_id, skipped, "Progress subscriber lagged, disconnecting");
                self.done = true;
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
