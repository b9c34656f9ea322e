//! Which images exist and in which partition, kept in sync with storage.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use melon_core::dataset::{DatasetSet, ImageRecord};
use melon_core::dataset_change::ChangeType;
use melon_core::error::CoreError;
use melon_core::model::DatasetHandle;
use melon_core::quality::{self, QualityReport};
use melon_core::storage::Storage;
use melon_db::models::change_log::NewChange;
use melon_db::models::image::SetStats;
use melon_db::repositories::{AnnotationRepo, ImageRepo};
use melon_db::DbPool;

use crate::change_tracker::ChangeTracker;
use crate::error::PipelineResult;

/// Result of reconciling the index with storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub added: u64,
    pub removed: u64,
    pub total: u64,
}

#[derive(Clone)]
pub struct DatasetIndex {
    pool: DbPool,
    storage: Arc<dyn Storage>,
}

impl DatasetIndex {
    pub fn new(pool: DbPool, storage: Arc<dyn Storage>) -> Self {
        Self { pool, storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Scan every partition in storage, index new images and drop the ones
    /// that disappeared. Each direction that changed anything is recorded
    /// as one change.
    pub async fn refresh(&self) -> PipelineResult<RefreshReport> {
        let mut found = BTreeSet::new();
        for set in DatasetSet::ALL {
            for path in self.storage.list(&set.storage_prefix()).await? {
                if let Some(record) = ImageRecord::from_storage_path(&path) {
                    found.insert(record.path);
                }
            }
        }

        let known: BTreeSet<String> = ImageRepo::list_paths(&self.pool).await?.into_iter().collect();
        let to_add: Vec<&String> = found.difference(&known).collect();
        let to_remove: Vec<String> = known.difference(&found).cloned().collect();
        if to_add.is_empty() && to_remove.is_empty() {
            tracing::debug!(total = found.len(), "Dataset index already up to date");
            return Ok(RefreshReport {
                total: found.len() as u64,
                ..Default::default()
            });
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let removed = ImageRepo::delete_many(&mut *tx, &to_remove).await?;
        let mut added = 0u64;
        for path in &to_add {
            if let Some(record) = ImageRecord::from_storage_path(path) {
                if ImageRepo::insert(&mut *tx, &record, now).await? {
                    added += 1;
                }
            }
        }
        if added > 0 {
            let identifier = to_add.first().map(|p| p.as_str()).unwrap_or_default();
            let change = NewChange::new(ChangeType::ImageAdded, identifier, added as i64)
                .with_details(serde_json::json!({ "source": "refresh" }));
            ChangeTracker::record_in(&mut *tx, change).await?;
        }
        if removed > 0 {
            let identifier = to_remove.first().map(String::as_str).unwrap_or_default();
            let change = NewChange::new(ChangeType::ImageRemoved, identifier, removed as i64)
                .with_details(serde_json::json!({ "source": "refresh" }));
            ChangeTracker::record_in(&mut *tx, change).await?;
        }
        tx.commit().await?;

        tracing::info!(added, removed, total = found.len(), "Dataset index refreshed");
        Ok(RefreshReport {
            added,
            removed,
            total: found.len() as u64,
        })
    }

    /// Store an uploaded image under `dataset/{set}/{filename}` and index it.
    pub async fn add_image(
        &self,
        set: DatasetSet,
        filename: &str,
        bytes: Vec<u8>,
    ) -> PipelineResult<ImageRecord> {
        let path = ImageRecord::storage_path_for(set, filename)?;
        let size = bytes.len();
        self.storage.put(&path, bytes).await?;

        // Path is built from a validated set and filename, so it parses.
        let record = ImageRecord::from_storage_path(&path)
            .ok_or_else(|| CoreError::Internal(format!("Unparseable dataset path '{path}'")))?;

        let mut tx = self.pool.begin().await?;
        if ImageRepo::insert(&mut *tx, &record, Utc::now()).await? {
            let change = NewChange::new(ChangeType::ImageAdded, &record.path, 1)
                .with_details(serde_json::json!({ "source": "upload", "bytes": size }));
            ChangeTracker::record_in(&mut *tx, change).await?;
        }
        tx.commit().await?;

        tracing::info!(path = %record.path, set = %set, size, "Image added to dataset");
        Ok(record)
    }

    pub async fn find(&self, path: &str) -> PipelineResult<Option<ImageRecord>> {
        Ok(ImageRepo::find_by_path(&self.pool, path).await?)
    }

    pub async fn stats(&self) -> PipelineResult<Vec<SetStats>> {
        Ok(ImageRepo::stats(&self.pool).await?)
    }

    /// Split and class-balance checks over the current annotations.
    pub async fn quality(&self) -> PipelineResult<QualityReport> {
        let annotated = AnnotationRepo::list_annotated(&self.pool).await?;
        let report = quality::analyze(quality::compose(annotated.iter().map(|(r, a)| (r, a))));
        tracing::debug!(
            total_annotated = report.total_annotated,
            issues = report.issues.len(),
            "Dataset quality analysed"
        );
        Ok(report)
    }

    /// Annotated images as of now, handed to extraction and training.
    pub async fn snapshot(&self) -> PipelineResult<DatasetHandle> {
        let images = AnnotationRepo::list_annotated(&self.pool).await?;
        Ok(DatasetHandle {
            images,
            storage: Arc::clone(&self.storage),
        })
    }
}
