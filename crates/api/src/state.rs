use std::sync::Arc;
use std::time::Duration;

use melon_core::model::FeatureExtractor;
use melon_core::storage::Storage;
use melon_events::ProgressBroadcaster;
use melon_pipeline::{
    AnnotationQueue, ChangeTracker, DatasetIndex, JobRunner, ModelRegistry,
};

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every member is behind `Arc` or wraps a pool handle.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: melon_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Open progress-stream connections.
    pub ws_manager: Arc<WsManager>,
    pub index: DatasetIndex,
    pub queue: AnnotationQueue,
    pub tracker: ChangeTracker,
    pub registry: Arc<ModelRegistry>,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Wire the pipeline services around `pool` and `storage`.
    ///
    /// Models are registered on the returned `registry` afterwards.
    pub fn build(
        pool: melon_db::DbPool,
        config: ServerConfig,
        storage: Arc<dyn Storage>,
        extractor: Option<Arc<dyn FeatureExtractor>>,
    ) -> Self {
        let index = DatasetIndex::new(pool.clone(), storage);
        let queue = AnnotationQueue::new(pool.clone());
        let tracker = ChangeTracker::new(pool.clone());
        let registry = Arc::new(
            ModelRegistry::new(pool.clone())
                .with_primary_metrics(config.detector_metric, config.classifier_metric)
                .with_model_timeout(Duration::from_secs(config.model_timeout_secs)),
        );
        let hub = Arc::new(ProgressBroadcaster::new(
            config.progress_buffer,
            config.job_log_tail_lines,
        ));

        let mut runner = JobRunner::new(
            pool.clone(),
            index.clone(),
            tracker.clone(),
            Arc::clone(&registry),
            hub,
            config.runner_config(),
        );
        if let Some(extractor) = extractor {
            runner = runner.with_extractor(extractor);
        }

        Self {
            pool,
            config: Arc::new(config),
            ws_manager: Arc::new(WsManager::new()),
            index,
            queue,
            tracker,
            registry,
            runner: Arc::new(runner),
        }
    }
}
