//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods. Single
//! statement methods accept any SQLite executor, so they run equally against
//! `&DbPool` or inside a caller's transaction (`&mut *tx`). Methods issuing
//! several statements take `&mut SqliteConnection`.

pub mod annotation_repo;
pub mod change_log_repo;
pub mod dataset_state_repo;
pub mod image_repo;
pub mod job_repo;
pub mod last_action_repo;
pub mod model_entry_repo;

pub use annotation_repo::AnnotationRepo;
pub use change_log_repo::ChangeLogRepo;
pub use dataset_state_repo::DatasetStateRepo;
pub use image_repo::ImageRepo;
pub use job_repo::JobRepo;
pub use last_action_repo::LastActionRepo;
pub use model_entry_repo::ModelEntryRepo;
