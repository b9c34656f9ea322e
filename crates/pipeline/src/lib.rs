//! Dataset-state and job-orchestration services.
//!
//! - [`DatasetIndex`] keeps the `images` table in sync with storage.
//! - [`AnnotationQueue`] pages through unannotated images and accepts
//!   submissions.
//! - [`ChangeTracker`] versions the dataset fingerprint and the change notice.
//! - [`JobRunner`] executes extraction and training as cancellable jobs.
//! - [`ModelRegistry`] holds the models per task and reconciles their output.

pub mod annotation_queue;
pub mod change_tracker;
pub mod dataset_index;
pub mod error;
pub mod external;
pub mod job_lock;
pub mod job_runner;
pub mod manifest;
pub mod model_registry;
pub mod reporter;

pub use annotation_queue::{AnnotationQueue, SubmitOutcome};
pub use change_tracker::ChangeTracker;
pub use dataset_index::{DatasetIndex, RefreshReport};
pub use error::{PipelineError, PipelineResult};
pub use job_runner::{JobRunner, RunnerConfig};
pub use model_registry::{ModelRegistry, PredictionReport, RankedModel};
