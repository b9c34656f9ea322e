//! Repository for the `annotations` table.

use sqlx::types::Json;
use sqlx::{Executor, Sqlite};

use melon_core::annotation::Annotation;
use melon_core::dataset::ImageRecord;
use melon_core::types::Timestamp;

use crate::models::annotation::{AnnotatedImageRow, AnnotationRow, StoredAnnotation};

/// Column list for `annotations` queries.
const COLUMNS: &str = "image_path, detection_label, boxes, created_at, updated_at";

/// Provides storage for manual annotations.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Insert or fully replace the annotation for `image_path`.
    pub async fn upsert<'e, E>(
        executor: E,
        image_path: &str,
        annotation: &Annotation,
        now: Timestamp,
    ) -> Result<StoredAnnotation, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "INSERT INTO annotations (image_path, detection_label, boxes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) \
             ON CONFLICT (image_path) DO UPDATE SET \
                 detection_label = excluded.detection_label, \
                 boxes = excluded.boxes, \
                 updated_at = excluded.updated_at \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(image_path)
            .bind(annotation.detection_label.as_str())
            .bind(Json(&annotation.boxes))
            .bind(now)
            .fetch_one(executor)
            .await?;
        StoredAnnotation::try_from(row)
    }

    pub async fn find<'e, E>(
        executor: E,
        image_path: &str,
    ) -> Result<Option<StoredAnnotation>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE image_path = ?1");
        sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(image_path)
            .fetch_optional(executor)
            .await?
            .map(StoredAnnotation::try_from)
            .transpose()
    }

    /// All annotated images joined with their annotations, ordered by path.
    pub async fn list_annotated<'e, E>(
        executor: E,
    ) -> Result<Vec<(ImageRecord, Annotation)>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AnnotatedImageRow>(
            "SELECT i.path, i.dataset_set, i.thumbnail_ref, a.detection_label, a.boxes \
             FROM annotations a \
             JOIN images i ON i.path = a.image_path \
             ORDER BY i.path",
        )
        .fetch_all(executor)
        .await?
        .into_iter()
        .map(<(ImageRecord, Annotation)>::try_from)
        .collect()
    }
}
