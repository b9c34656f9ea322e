use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use melon_core::annotation::{Annotation, BoundingBox};
use melon_core::dataset::ImageRecord;
use melon_core::types::Timestamp;

use super::decode;

/// A row from the `annotations` table.
#[derive(Debug, Clone, FromRow)]
pub struct AnnotationRow {
    pub image_path: String,
    pub detection_label: String,
    pub boxes: Json<Vec<BoundingBox>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A persisted annotation with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAnnotation {
    pub image_path: String,
    #[serde(flatten)]
    pub annotation: Annotation,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<AnnotationRow> for StoredAnnotation {
    type Error = sqlx::Error;

    fn try_from(row: AnnotationRow) -> Result<Self, Self::Error> {
        Ok(StoredAnnotation {
            image_path: row.image_path,
            annotation: Annotation {
                detection_label: decode(&row.detection_label)?,
                boxes: row.boxes.0,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// An image joined with its annotation, as handed to training.
#[derive(Debug, FromRow)]
pub(crate) struct AnnotatedImageRow {
    pub path: String,
    pub dataset_set: String,
    pub thumbnail_ref: String,
    pub detection_label: String,
    pub boxes: Json<Vec<BoundingBox>>,
}

impl TryFrom<AnnotatedImageRow> for (ImageRecord, Annotation) {
    type Error = sqlx::Error;

    fn try_from(row: AnnotatedImageRow) -> Result<Self, Self::Error> {
        Ok((
            ImageRecord {
                path: row.path,
                set: decode(&row.dataset_set)?,
                thumbnail_ref: row.thumbnail_ref,
            },
            Annotation {
                detection_label: decode(&row.detection_label)?,
                boxes: row.boxes.0,
            },
        ))
    }
}
