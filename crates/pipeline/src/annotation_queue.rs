//! The queue of images still waiting for a manual annotation.
//!
//! Pages are derived per request from the `images` and `annotations` tables
//! and ordered by the immutable image path, so annotating an image removes
//! it from later pages without reshuffling the images not yet visited.

use chrono::Utc;
use serde::Serialize;

use melon_core::annotation::Annotation;
use melon_core::dataset::ImageRecord;
use melon_core::dataset_change::ChangeType;
use melon_core::error::CoreError;
use melon_core::pagination::{Page, PageWindow};
use melon_db::models::annotation::StoredAnnotation;
use melon_db::models::change_log::NewChange;
use melon_db::repositories::{AnnotationRepo, ImageRepo};
use melon_db::DbPool;

use crate::change_tracker::ChangeTracker;
use crate::error::PipelineResult;

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub annotation: StoredAnnotation,
    pub change_type: ChangeType,
    /// First image of the refreshed queue, `None` once everything is annotated.
    pub next: Option<ImageRecord>,
    /// Unannotated images left after this submission.
    pub remaining: u64,
}

#[derive(Clone)]
pub struct AnnotationQueue {
    pool: DbPool,
}

impl AnnotationQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// One page of unannotated images. `page_number` is clamped into range.
    pub async fn list_page(
        &self,
        page_size: u32,
        page_number: u32,
    ) -> PipelineResult<Page<ImageRecord>> {
        if page_size == 0 {
            return Err(CoreError::Validation("page_size must be at least 1".into()).into());
        }
        // Count and page read from one snapshot.
        let mut tx = self.pool.begin().await?;
        let total = ImageRepo::count_unannotated(&mut *tx).await?.max(0) as u64;
        let window = PageWindow::resolve(page_size, page_number, total)?;
        let items = ImageRepo::list_unannotated(
            &mut *tx,
            i64::from(window.page_size),
            i64::try_from(window.offset()).unwrap_or(i64::MAX),
        )
        .await?;
        tx.commit().await?;
        Ok(Page::new(items, total, window))
    }

    /// Validate and store `annotation` for `path`, replacing any previous
    /// one, and record the change in the same transaction.
    pub async fn submit(
        &self,
        path: &str,
        annotation: Annotation,
    ) -> PipelineResult<SubmitOutcome> {
        annotation.validate()?;
        if ImageRepo::find_by_path(&self.pool, path).await?.is_none() {
            return Err(CoreError::not_found("Image", path).into());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        // The upsert goes first so the transaction takes the write lock
        // before it reads anything.
        let stored = AnnotationRepo::upsert(&mut *tx, path, &annotation, now).await?;
        let change_type = if stored.created_at == stored.updated_at {
            ChangeType::AnnotationAdded
        } else {
            ChangeType::AnnotationModified
        };
        let (ripe, unripe) = annotation.ripeness_counts();
        let change = NewChange::new(change_type, path, 1).with_details(serde_json::json!({
            "detection_label": annotation.detection_label,
            "boxes": annotation.boxes.len(),
            "ripe": ripe,
            "unripe": unripe,
        }));
        ChangeTracker::record_in(&mut *tx, change).await?;

        let remaining = ImageRepo::count_unannotated(&mut *tx).await?.max(0) as u64;
        let next = ImageRepo::list_unannotated(&mut *tx, 1, 0)
            .await?
            .into_iter()
            .next();
        tx.commit().await?;

        tracing::info!(
            path,
            change_type = %change_type,
            remaining,
            "Annotation saved",
        );
        Ok(SubmitOutcome {
            annotation: stored,
            change_type,
            next,
            remaining,
        })
    }

    pub async fn get(&self, path: &str) -> PipelineResult<StoredAnnotation> {
        AnnotationRepo::find(&self.pool, path)
            .await?
            .ok_or_else(|| CoreError::not_found("Annotation", path).into())
    }
}
