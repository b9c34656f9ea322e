use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use melon_core::model::PrimaryMetric;
use melon_pipeline::RunnerConfig;

/// Headroom over the per-model timeout for voting and serialization.
const PREDICTION_SLACK_SECS: u64 = 5;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time running jobs get to wind down after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    pub database_url: String,
    /// Root directory of the local image store.
    pub storage_root: PathBuf,
    /// JSON manifest of external models. No models are registered when unset.
    pub model_manifest: Option<PathBuf>,
    pub job_cancel_grace_secs: u64,
    pub job_retention_hours: u64,
    /// Log lines kept per job for late subscribers.
    pub job_log_tail_lines: usize,
    /// Consecutive failures before a job kind refuses triggers (`0` disables).
    pub job_failure_threshold: u32,
    /// Events a progress subscriber may lag by before it is disconnected.
    pub progress_buffer: usize,
    pub detector_metric: PrimaryMetric,
    pub classifier_metric: PrimaryMetric,
    /// Per-model limit for one prediction request.
    pub model_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `3000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                    |
    /// | `DATABASE_URL`              | `sqlite://melon.db`     |
    /// | `STORAGE_ROOT`              | `./storage`             |
    /// | `MODEL_MANIFEST`            | unset                   |
    /// | `JOB_CANCEL_GRACE_SECS`     | `10`                    |
    /// | `JOB_RETENTION_HOURS`       | `24`                    |
    /// | `JOB_LOG_TAIL_LINES`        | `200`                   |
    /// | `JOB_FAILURE_THRESHOLD`     | `5`                     |
    /// | `PROGRESS_BUFFER`           | `256`                   |
    /// | `DETECTOR_PRIMARY_METRIC`   | `f1`                    |
    /// | `CLASSIFIER_PRIMARY_METRIC` | `accuracy`              |
    /// | `MODEL_TIMEOUT_SECS`        | `20`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://melon.db".into());
        let storage_root = std::env::var("STORAGE_ROOT")
            .unwrap_or_else(|_| "./storage".into())
            .into();
        let model_manifest = std::env::var("MODEL_MANIFEST")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            host,
            port: parse_env("PORT", "3000"),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", "30"),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", "30"),
            database_url,
            storage_root,
            model_manifest,
            job_cancel_grace_secs: parse_env("JOB_CANCEL_GRACE_SECS", "10"),
            job_retention_hours: parse_env("JOB_RETENTION_HOURS", "24"),
            job_log_tail_lines: parse_env("JOB_LOG_TAIL_LINES", "200"),
            job_failure_threshold: parse_env("JOB_FAILURE_THRESHOLD", "5"),
            progress_buffer: parse_env("PROGRESS_BUFFER", "256"),
            detector_metric: parse_env("DETECTOR_PRIMARY_METRIC", "f1"),
            classifier_metric: parse_env("CLASSIFIER_PRIMARY_METRIC", "accuracy"),
            model_timeout_secs: parse_env("MODEL_TIMEOUT_SECS", "20"),
        }
    }

    /// HTTP request limit, stretched so a prediction whose slowest model hits
    /// the per-model timeout still answers with the other models' results.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .max(self.model_timeout_secs + PREDICTION_SLACK_SECS),
        )
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_hours * 60 * 60)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            cancel_grace: Duration::from_secs(self.job_cancel_grace_secs),
            retention: self.job_retention(),
            failure_threshold: self.job_failure_threshold,
        }
    }
}

/// Parse `name` (or `default`), panicking on a malformed value so that
/// misconfiguration fails at startup.
fn parse_env<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.into());
    raw.parse()
        .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}"))
}
