use std::sync::Arc;

use melon_core::progress::{ProgressEvent, ProgressSink};
use melon_core::types::JobId;
use melon_events::ProgressBroadcaster;

/// [`ProgressSink`] handed to operations: every tick and log line is
/// published to the job's channel.
pub struct JobReporter {
    hub: Arc<ProgressBroadcaster>,
    job_id: JobId,
}

impl JobReporter {
    pub fn new(hub: Arc<ProgressBroadcaster>, job_id: JobId) -> Self {
        Self { hub, job_id }
    }
}

impl ProgressSink for JobReporter {
    fn progress(&self, percent: u8, message: &str) {
        self.hub
            .publish(self.job_id, ProgressEvent::progress(percent, message));
    }

    fn log(&self, line: &str) {
        tracing::debug!(job_id = %self.job_id, line, "Job log");
        self.hub.publish(self.job_id, ProgressEvent::log(line));
    }
}
