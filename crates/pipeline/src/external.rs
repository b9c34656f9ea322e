//! Models and feature extractors implemented by external programs.
//!
//! Protocol:
//! - `predict`: raw image bytes on stdin; one JSON object
//!   `{"label", "confidence", ...}` on stdout.
//! - `train` / extraction: the annotated dataset on stdin as JSON lines
//!   (`{"path", "set", "detection_label", "boxes"}`); stdout lines are
//!   streamed as job log lines, a line containing `NN%` is a progress tick,
//!   and the last line that parses as a JSON object is the resulting metrics.
//!
//! `MELON_JOB_ID` and `MELON_MODE` are set for training and extraction runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use melon_core::model::{
    FeatureExtractor, JobContext, Metrics, Model, ModelError, ModelTask, Prediction,
};
use melon_core::progress::ProgressSink;

/// Default timeout for a single prediction.
pub const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum stdout captured from a prediction (1 MiB).
const MAX_PREDICT_OUTPUT_BYTES: u64 = 1024 * 1024;

/// Stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s?%").expect("valid regex"));

/// How to launch an external program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

// ---------------------------------------------------------------------------
// Streaming runs (train / extract)
// ---------------------------------------------------------------------------

/// What a stdout line of a streaming run means.
#[derive(Debug, PartialEq)]
enum OutputLine {
    Metrics(Metrics),
    Progress(u8),
    Log,
}

fn classify_line(line: &str) -> OutputLine {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(metrics) = serde_json::from_str::<Metrics>(trimmed) {
            return OutputLine::Metrics(metrics);
        }
    }
    if let Some(caps) = PERCENT_RE.captures(trimmed) {
        if let Ok(percent) = caps[1].parse::<u16>() {
            return OutputLine::Progress(percent.min(100) as u8);
        }
    }
    OutputLine::Log
}

/// One JSON line per annotated image.
fn dataset_lines(ctx: &JobContext<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    for (record, annotation) in &ctx.dataset.images {
        let line = serde_json::json!({
            "path": record.path,
            "set": record.set,
            "detection_label": annotation.detection_label,
            "boxes": annotation.boxes,
        });
        out.extend_from_slice(line.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

async fn collect_stderr<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<String> {
    let mut tail = Vec::new();
    if let Some(stream) = stream {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
    }
    tail
}

/// Run `spec` against the job's dataset, streaming progress until it exits
/// or the job is cancelled. `fail` wraps error messages in the caller's
/// error variant.
async fn run_streaming(
    spec: &CommandSpec,
    ctx: JobContext<'_>,
    fail: fn(String) -> ModelError,
) -> Result<Metrics, ModelError> {
    let mut cmd = spec.command();
    cmd.env("MELON_JOB_ID", ctx.job_id.to_string())
        .env("MELON_MODE", ctx.mode.as_str());
    let mut child = cmd
        .spawn()
        .map_err(|e| fail(format!("could not start '{}': {e}", spec.program)))?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = dataset_lines(&ctx);
        // The program may exit without reading its input.
        tokio::spawn(async move {
            let _ = stdin.write_all(&payload).await;
        });
    }
    let stderr = tokio::spawn(collect_stderr(child.stderr.take()));
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| fail("stdout was not captured".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let mut metrics = None;
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                kill(&mut child, &spec.program).await;
                return Err(ModelError::Cancelled);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match classify_line(&line) {
                    OutputLine::Metrics(m) => metrics = Some(m),
                    OutputLine::Progress(p) => ctx.progress.progress(p, line.trim()),
                    OutputLine::Log => ctx.progress.log(&line),
                },
                Ok(None) => break,
                Err(e) => return Err(fail(format!("reading output failed: {e}"))),
            }
        }
    }

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            kill(&mut child, &spec.program).await;
            return Err(ModelError::Cancelled);
        }
        status = child.wait() => status.map_err(|e| fail(e.to_string()))?,
    };
    let stderr_tail = stderr.await.unwrap_or_default();
    if !status.success() {
        let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = stderr_tail.last().cloned().unwrap_or_default();
        return Err(fail(format!("'{}' exited with {code}: {detail}", spec.program)));
    }
    metrics.ok_or_else(|| fail(format!("'{}' reported no metrics", spec.program)))
}

/// Spawn a prediction run and wait for it to exit.
///
/// The image is written from its own task, so a program that never reads
/// stdin cannot block the caller.
async fn run_prediction(
    spec: &CommandSpec,
    image: &[u8],
) -> Result<(ExitStatus, Vec<u8>, Vec<String>), ModelError> {
    let mut child = spec
        .command()
        .spawn()
        .map_err(|e| ModelError::Prediction(format!("could not start '{}': {e}", spec.program)))?;

    let stdout = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(out) = stdout {
            let _ = out.take(MAX_PREDICT_OUTPUT_BYTES).read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(collect_stderr(child.stderr.take()));

    if let Some(mut stdin) = child.stdin.take() {
        let payload = image.to_vec();
        tokio::spawn(async move {
            let _ = stdin.write_all(&payload).await;
        });
    }

    let status = child
        .wait()
        .await
        .map_err(|e| ModelError::Prediction(e.to_string()))?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr_tail = stderr_task.await.unwrap_or_default();
    Ok((status, stdout, stderr_tail))
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(program, error = %e, "Failed to kill cancelled process");
    }
}

// ---------------------------------------------------------------------------
// CommandModel
// ---------------------------------------------------------------------------

pub struct CommandModel {
    key: String,
    task: ModelTask,
    display_name: String,
    predict: CommandSpec,
    train: Option<CommandSpec>,
    seed_metrics: Option<Metrics>,
    predict_timeout: Duration,
}

impl CommandModel {
    pub fn new(
        key: impl Into<String>,
        task: ModelTask,
        display_name: impl Into<String>,
        predict: CommandSpec,
    ) -> Self {
        Self {
            key: key.into(),
            task,
            display_name: display_name.into(),
            predict,
            train: None,
            seed_metrics: None,
            predict_timeout: DEFAULT_PREDICT_TIMEOUT,
        }
    }

    pub fn with_train(mut self, train: CommandSpec) -> Self {
        self.train = Some(train);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.seed_metrics = metrics;
        self
    }

    pub fn with_predict_timeout(mut self, timeout: Duration) -> Self {
        self.predict_timeout = timeout;
        self
    }
}

#[async_trait]
impl Model for CommandModel {
    fn key(&self) -> &str {
        &self.key
    }

    fn task(&self) -> ModelTask {
        self.task
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn predict(&self, image: &[u8]) -> Result<Prediction, ModelError> {
        let program = &self.predict.program;
        // On timeout the run is dropped, which kills the child.
        let (status, stdout, stderr_tail) =
            tokio::time::timeout(self.predict_timeout, run_prediction(&self.predict, image))
                .await
                .map_err(|_| {
                    ModelError::Prediction(format!(
                        "'{program}' timed out after {}ms",
                        self.predict_timeout.as_millis()
                    ))
                })??;

        if !status.success() {
            let detail = stderr_tail.last().cloned().unwrap_or_default();
            return Err(ModelError::Prediction(format!(
                "'{program}' exited with {status}: {detail}"
            )));
        }
        let text = String::from_utf8_lossy(&stdout);
        let line = text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        let raw: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| ModelError::Prediction(format!("invalid prediction output: {e}")))?;
        let mut prediction: Prediction = serde_json::from_value(raw.clone())
            .map_err(|e| ModelError::Prediction(format!("invalid prediction output: {e}")))?;
        prediction.raw = raw;
        Ok(prediction)
    }

    async fn train(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        let Some(spec) = &self.train else {
            return Err(ModelError::Training(format!(
                "{} has no training command",
                self.display_name
            )));
        };
        run_streaming(spec, ctx, ModelError::Training).await
    }

    fn metrics(&self) -> Option<Metrics> {
        self.seed_metrics.clone()
    }
}

// ---------------------------------------------------------------------------
// CommandFeatureExtractor
// ---------------------------------------------------------------------------

pub struct CommandFeatureExtractor {
    spec: CommandSpec,
}

impl CommandFeatureExtractor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl FeatureExtractor for CommandFeatureExtractor {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        run_streaming(&self.spec, ctx, ModelError::Extraction).await
    }
}
