//! Long-running feature extraction and training jobs.
//!
//! Each triggered job runs on its own Tokio task under a supervisor that
//! owns the per-kind lock guard. Progress flows through a [`JobReporter`]
//! into the broadcaster; the supervisor applies side effects, releases the
//! lock, and only then publishes the terminal event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use melon_core::dataset_change::ChangeType;
use melon_core::error::CoreError;
use melon_core::job::{
    failure_summary, Job, JobKind, JobMode, JobState, LastAction, TerminalStatus,
    DEFAULT_CANCEL_GRACE, DEFAULT_FAILURE_THRESHOLD,
};
use melon_core::model::{FeatureExtractor, JobContext, Metrics, ModelError, ModelTask};
use melon_core::progress::{ProgressEvent, ProgressSink, ScaledProgress};
use melon_core::types::JobId;
use melon_db::models::change_log::NewChange;
use melon_db::models::job::JobListQuery;
use melon_db::repositories::JobRepo;
use melon_db::DbPool;
use melon_events::{ProgressBroadcaster, Subscription};

use crate::change_tracker::ChangeTracker;
use crate::dataset_index::DatasetIndex;
use crate::error::PipelineResult;
use crate::job_lock::{KindGuard, KindLocks};
use crate::model_registry::ModelRegistry;
use crate::reporter::JobReporter;

/// Default age after which finished jobs are pruned.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long a cancelled operation gets to stop before it is abandoned.
    pub cancel_grace: Duration,
    pub retention: Duration,
    /// Consecutive failures before a kind refuses triggers. `0` disables.
    pub failure_threshold: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cancel_grace: DEFAULT_CANCEL_GRACE,
            retention: DEFAULT_RETENTION,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// How an operation ended, before side effects are applied.
enum Completion {
    Succeeded {
        summary: String,
        trained: Vec<(String, Metrics)>,
        extraction: Option<Metrics>,
        items_affected: i64,
    },
    Failed(String),
    Cancelled,
}

impl Completion {
    fn status(&self) -> TerminalStatus {
        match self {
            Self::Succeeded { .. } => TerminalStatus::Succeeded,
            Self::Failed(_) => TerminalStatus::Failed,
            Self::Cancelled => TerminalStatus::Cancelled,
        }
    }

    fn from_join(result: Result<Completion, JoinError>) -> Self {
        match result {
            Ok(completion) => completion,
            Err(e) if e.is_panic() => Self::Failed("Operation panicked".into()),
            Err(_) => Self::Cancelled,
        }
    }
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

pub struct JobRunner {
    pool: DbPool,
    index: DatasetIndex,
    tracker: ChangeTracker,
    registry: Arc<ModelRegistry>,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    hub: Arc<ProgressBroadcaster>,
    locks: KindLocks,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    consecutive_failures: Mutex<HashMap<JobKind, u32>>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        pool: DbPool,
        index: DatasetIndex,
        tracker: ChangeTracker,
        registry: Arc<ModelRegistry>,
        hub: Arc<ProgressBroadcaster>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            pool,
            index,
            tracker,
            registry,
            extractor: None,
            hub,
            locks: KindLocks::new(),
            jobs: Mutex::new(HashMap::new()),
            consecutive_failures: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<JobKind, u32>> {
        self.consecutive_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Trigger / cancel
    // -----------------------------------------------------------------------

    /// Start a job of `kind` and return it in the `running` state.
    ///
    /// Fails with [`CoreError::Conflict`] while another job of the same kind
    /// runs, or while the kind's failure breaker is open.
    pub async fn trigger(self: &Arc<Self>, kind: JobKind, mode: JobMode) -> PipelineResult<Job> {
        let failures = self.consecutive_failures(kind);
        if self.config.failure_threshold > 0 && failures >= self.config.failure_threshold {
            tracing::warn!(kind = %kind, failures, "Trigger refused by failure breaker");
            return Err(CoreError::Conflict(format!(
                "{kind} has failed {failures} times in a row; reset the breaker before retrying"
            ))
            .into());
        }

        let job_id = Uuid::now_v7();
        let guard = self.locks.try_acquire(kind, job_id).map_err(|holder| {
            CoreError::Conflict(format!("A {kind} job is already running (job {holder})"))
        })?;

        let now = Utc::now();
        let mut job = Job {
            id: job_id,
            kind,
            mode,
            state: JobState::Pending,
            progress_percent: 0,
            log_tail: Vec::new(),
            summary: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };
        job.state = job.state.transition(JobState::Running)?;
        job.started_at = Some(now);

        // On error the guard drops here and the kind is free again.
        JobRepo::insert(&self.pool, &job).await?;

        let cancel = CancellationToken::new();
        self.hub.open(job_id);
        self.jobs().insert(
            job_id,
            JobEntry {
                job: job.clone(),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(job_id = %job_id, kind = %kind, mode = %mode, "Job started");
        tokio::spawn(Arc::clone(self).supervise(job_id, kind, mode, guard, cancel));
        Ok(job)
    }

    /// Ask a running job to stop. The job becomes `cancelled` once the
    /// operation acknowledges, or when the grace period runs out.
    pub async fn cancel(&self, job_id: JobId) -> PipelineResult<Job> {
        {
            let jobs = self.jobs();
            if let Some(entry) = jobs.get(&job_id) {
                if entry.job.state != JobState::Running {
                    return Err(not_running(job_id, entry.job.state).into());
                }
                entry.cancel.cancel();
                tracing::info!(job_id = %job_id, kind = %entry.job.kind, "Job cancellation requested");
                return Ok(self.view(entry));
            }
        }
        match JobRepo::find_by_id(&self.pool, job_id).await? {
            Some(job) => Err(not_running(job_id, job.state).into()),
            None => Err(CoreError::not_found("Job", job_id).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Supervision
    // -----------------------------------------------------------------------

    async fn supervise(
        self: Arc<Self>,
        job_id: JobId,
        kind: JobKind,
        mode: JobMode,
        guard: KindGuard,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let runner = Arc::clone(&self);
        let token = cancel.clone();
        let mut work = tokio::spawn(async move { runner.execute(job_id, kind, mode, token).await });

        let completion = tokio::select! {
            result = &mut work => Completion::from_join(result),
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.cancel_grace, &mut work).await {
                    // Finished before noticing the request: keep a success.
                    Ok(result) => match Completion::from_join(result) {
                        done @ Completion::Succeeded { .. } => done,
                        _ => Completion::Cancelled,
                    },
                    Err(_) => {
                        work.abort();
                        tracing::warn!(
                            job_id = %job_id,
                            kind = %kind,
                            grace_secs = self.config.cancel_grace.as_secs_f64(),
                            "Operation ignored cancellation, abandoned",
                        );
                        self.hub.publish(
                            job_id,
                            ProgressEvent::log("Operation did not stop within the grace period; abandoned"),
                        );
                        Completion::Cancelled
                    }
                }
            }
        };

        self.finish(job_id, kind, mode, guard, completion, started).await;
    }

    async fn finish(
        &self,
        job_id: JobId,
        kind: JobKind,
        mode: JobMode,
        guard: KindGuard,
        completion: Completion,
        started: Instant,
    ) {
        let status = completion.status();
        let summary = match completion {
            Completion::Succeeded {
                summary,
                trained,
                extraction,
                items_affected,
            } => {
                self.apply_success(job_id, kind, &trained, extraction.as_ref(), items_affected)
                    .await;
                summary
            }
            Completion::Failed(message) => {
                let summary = failure_summary(&message);
                self.hub.publish(job_id, ProgressEvent::log(format!("ERROR: {summary}")));
                summary
            }
            Completion::Cancelled => "Cancelled".to_string(),
        };

        self.update_breaker(kind, status);

        let finished_at = Utc::now();
        let duration_secs = started.elapsed().as_secs_f64();
        let action = LastAction {
            action_key: kind.action_key(mode),
            status,
            duration_secs,
            summary: Some(summary.clone()),
            performed_at: finished_at,
        };
        if let Err(e) = self.tracker.record_last_action(&action).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record last action");
        }

        let final_view = {
            let mut jobs = self.jobs();
            jobs.get_mut(&job_id).map(|entry| {
                entry.job.state = status.into();
                entry.job.summary = Some(summary.clone());
                entry.job.finished_at = Some(finished_at);
                let mut view = self.view(entry);
                if status == TerminalStatus::Succeeded {
                    view.progress_percent = 100;
                }
                view
            })
        };
        if let Some(job) = &final_view {
            if let Err(e) = JobRepo::finish(&self.pool, job).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist finished job");
            }
        }

        drop(guard);
        tracing::info!(
            job_id = %job_id,
            kind = %kind,
            status = status.as_str(),
            duration_secs,
            "Job finished",
        );
        self.hub
            .publish(job_id, ProgressEvent::terminal(status, Some(summary)));
    }

    async fn apply_success(
        &self,
        job_id: JobId,
        kind: JobKind,
        trained: &[(String, Metrics)],
        extraction: Option<&Metrics>,
        items_affected: i64,
    ) {
        for (key, metrics) in trained {
            if let Err(e) = self.registry.record_training(key, metrics).await {
                tracing::error!(job_id = %job_id, model_key = %key, error = %e, "Failed to store model metrics");
            }
        }
        let change_type = match kind {
            JobKind::ExtractFeatures => ChangeType::FeaturesExtracted,
            JobKind::TrainClassifier | JobKind::TrainDetector => ChangeType::ModelTrained,
        };
        let keys: Vec<&str> = trained.iter().map(|(k, _)| k.as_str()).collect();
        let change = NewChange::new(change_type, kind.as_str(), items_affected)
            .with_details(serde_json::json!({
                "job_id": job_id,
                "models": keys,
                "extraction": extraction,
            }));
        if let Err(e) = self.tracker.record(change).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record dataset change");
        }
    }

    fn update_breaker(&self, kind: JobKind, status: TerminalStatus) {
        let mut failures = self.failures();
        match status {
            TerminalStatus::Succeeded => {
                failures.remove(&kind);
            }
            TerminalStatus::Failed => {
                let count = failures.entry(kind).or_insert(0);
                *count += 1;
                if self.config.failure_threshold > 0 && *count == self.config.failure_threshold {
                    tracing::warn!(kind = %kind, failures = *count, "Failure breaker opened");
                }
            }
            TerminalStatus::Cancelled => {}
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn execute(
        self: Arc<Self>,
        job_id: JobId,
        kind: JobKind,
        mode: JobMode,
        cancel: CancellationToken,
    ) -> Completion {
        let dataset = match self.index.snapshot().await {
            Ok(dataset) => dataset,
            Err(e) => return Completion::Failed(format!("Could not load the dataset: {e}")),
        };
        let reporter = JobReporter::new(Arc::clone(&self.hub), job_id);
        reporter.log(&format!(
            "Starting {kind} ({mode}) on {} annotated images",
            dataset.len()
        ));

        let ctx = JobContext {
            job_id,
            mode,
            dataset: &dataset,
            progress: &reporter,
            cancel: &cancel,
        };
        match kind.model_task() {
            None => self.extract(ctx).await,
            Some(task) => self.train(task, ctx).await,
        }
    }

    async fn extract(&self, ctx: JobContext<'_>) -> Completion {
        let Some(extractor) = &self.extractor else {
            return Completion::Failed("No feature extractor is configured".into());
        };
        match extractor.run(ctx).await {
            Ok(metrics) => {
                let images = ctx.dataset.len();
                if !metrics.extra.is_empty() {
                    ctx.progress.log(&format!("Extraction counters: {:?}", metrics.extra));
                }
                ctx.progress.progress(100, "Feature extraction complete");
                Completion::Succeeded {
                    summary: format!("Extracted features for {images} images ({})", ctx.mode),
                    trained: Vec::new(),
                    extraction: Some(metrics),
                    items_affected: images as i64,
                }
            }
            Err(ModelError::Cancelled) => Completion::Cancelled,
            Err(e) => Completion::Failed(e.to_string()),
        }
    }

    async fn train(&self, task: ModelTask, ctx: JobContext<'_>) -> Completion {
        let models = self.registry.models_for(task);
        if models.is_empty() {
            return Completion::Failed(format!("No {task} models are registered"));
        }

        let count = models.len();
        let mut trained = Vec::new();
        let mut first_error: Option<String> = None;
        for (index, model) in models.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Completion::Cancelled;
            }
            ctx.progress.log(&format!(
                "Training {} ({}/{count})",
                model.display_name(),
                index + 1
            ));
            let scaled = ScaledProgress::new(ctx.progress, index, count);
            let model_ctx = JobContext {
                progress: &scaled,
                ..ctx
            };
            match model.train(model_ctx).await {
                Ok(metrics) => {
                    ctx.progress.log(&format!("Trained {}", model.display_name()));
                    trained.push((model.key().to_string(), metrics));
                }
                Err(ModelError::Cancelled) => return Completion::Cancelled,
                Err(e) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        model_key = %model.key(),
                        error = %e,
                        "Model training failed",
                    );
                    ctx.progress
                        .log(&format!("Training {} failed: {e}", model.display_name()));
                    first_error.get_or_insert_with(|| format!("{}: {e}", model.display_name()));
                }
            }
        }

        if trained.is_empty() {
            return Completion::Failed(format!(
                "All {count} {task} models failed to train; first error: {}",
                first_error.unwrap_or_default()
            ));
        }
        ctx.progress.progress(100, "Training complete");
        Completion::Succeeded {
            summary: format!("Trained {} of {count} {task} models", trained.len()),
            items_affected: trained.len() as i64,
            trained,
            extraction: None,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The job with live progress folded in.
    fn view(&self, entry: &JobEntry) -> Job {
        let mut job = entry.job.clone();
        if let Some(snapshot) = self.hub.snapshot(job.id) {
            job.progress_percent = snapshot.percent;
            job.log_tail = snapshot.log_tail.to_vec();
        }
        job
    }

    pub async fn get(&self, job_id: JobId) -> PipelineResult<Job> {
        let tracked = self.jobs().get(&job_id).map(|e| self.view(e));
        if let Some(job) = tracked {
            return Ok(job);
        }
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id).into())
    }

    /// Job history, newest first. Jobs tracked in memory show live progress.
    pub async fn list(&self, query: &JobListQuery) -> PipelineResult<Vec<Job>> {
        let stored = JobRepo::list(&self.pool, query).await?;
        let jobs = self.jobs();
        Ok(stored
            .into_iter()
            .map(|job| jobs.get(&job.id).map(|e| self.view(e)).unwrap_or(job))
            .collect())
    }

    pub fn running_job(&self, kind: JobKind) -> Option<Job> {
        let holder = self.locks.holder(kind)?;
        self.jobs().get(&holder).map(|e| self.view(e))
    }

    /// Progress stream of a job still tracked in memory.
    pub fn subscribe(&self, job_id: JobId) -> Option<Subscription> {
        self.hub.subscribe(job_id)
    }

    pub fn consecutive_failures(&self, kind: JobKind) -> u32 {
        self.failures().get(&kind).copied().unwrap_or(0)
    }

    pub fn reset_breaker(&self, kind: JobKind) {
        if self.failures().remove(&kind).is_some() {
            tracing::info!(kind = %kind, "Failure breaker reset");
        }
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    /// Fail jobs a previous process left running. Call once before serving.
    pub async fn recover_interrupted(&self) -> PipelineResult<u64> {
        let failed = JobRepo::fail_interrupted(&self.pool, Utc::now()).await?;
        if failed > 0 {
            tracing::warn!(count = failed, "Marked interrupted jobs as failed");
        }
        Ok(failed)
    }

    /// Drop jobs that finished more than `retention` ago from memory, the
    /// broadcaster, and the job table.
    pub async fn prune(&self, retention: Duration) -> PipelineResult<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| CoreError::Validation(format!("Invalid retention: {e}")))?;
        let cutoff = Utc::now() - retention;

        let expired: Vec<JobId> = self
            .jobs()
            .iter()
            .filter(|(_, e)| e.job.state.is_terminal() && e.job.finished_at.is_some_and(|t| t < cutoff))
            .map(|(id, _)| *id)
            .collect();
        {
            let mut jobs = self.jobs();
            for id in &expired {
                jobs.remove(id);
                self.hub.remove(*id);
            }
        }

        let deleted = JobRepo::delete_finished_before(&self.pool, cutoff).await?;
        tracing::debug!(in_memory = expired.len(), deleted, "Pruned finished jobs");
        Ok(deleted)
    }

    /// Request cancellation of every running job, e.g. on shutdown.
    pub fn cancel_all(&self) {
        for entry in self.jobs().values() {
            if entry.job.state == JobState::Running {
                entry.cancel.cancel();
            }
        }
    }
}

fn not_running(job_id: JobId, state: JobState) -> CoreError {
    CoreError::Conflict(format!("Job {job_id} is not running (state: {state})"))
}
