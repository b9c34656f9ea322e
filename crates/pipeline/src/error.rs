use melon_core::error::CoreError;
use melon_core::storage::StorageError;

/// Error returned by the pipeline services.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Flatten into the domain taxonomy. Database failures become
    /// [`CoreError::Internal`].
    pub fn into_core(self) -> CoreError {
        match self {
            Self::Core(e) => e,
            Self::Storage(e) => e.into(),
            Self::Database(e) => CoreError::Internal(e.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
