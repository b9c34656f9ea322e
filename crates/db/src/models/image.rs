use serde::Serialize;
use sqlx::FromRow;

use melon_core::dataset::{DatasetSet, ImageRecord};
use melon_core::types::Timestamp;

use super::decode;

/// A row from the `images` table.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub path: String,
    pub dataset_set: String,
    pub thumbnail_ref: String,
    pub discovered_at: Timestamp,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = sqlx::Error;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        Ok(ImageRecord {
            path: row.path,
            set: decode(&row.dataset_set)?,
            thumbnail_ref: row.thumbnail_ref,
        })
    }
}

/// Image totals for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetStats {
    pub set: DatasetSet,
    pub total: i64,
    pub annotated: i64,
    pub unannotated: i64,
}

#[derive(Debug, FromRow)]
pub(crate) struct SetStatsRow {
    pub dataset_set: String,
    pub total: i64,
    pub annotated: i64,
}

impl TryFrom<SetStatsRow> for SetStats {
    type Error = sqlx::Error;

    fn try_from(row: SetStatsRow) -> Result<Self, Self::Error> {
        Ok(SetStats {
            set: decode(&row.dataset_set)?,
            total: row.total,
            annotated: row.annotated,
            unannotated: row.total - row.annotated,
        })
    }
}
