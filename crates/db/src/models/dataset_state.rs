use sqlx::FromRow;

use melon_core::dataset_change::{AckState, ChangeType, DatasetFingerprint};
use melon_core::types::Timestamp;

use super::decode;

/// The single row of the `dataset_state` table.
#[derive(Debug, Clone, FromRow)]
pub struct DatasetStateRow {
    pub version: i64,
    pub last_change_type: Option<String>,
    pub last_change_identifier: Option<String>,
    pub items_affected: i64,
    pub changed_at: Option<Timestamp>,
    pub seen_version: i64,
}

impl DatasetStateRow {
    pub fn fingerprint(&self) -> Result<DatasetFingerprint, sqlx::Error> {
        let last_change_type = self
            .last_change_type
            .as_deref()
            .map(decode::<ChangeType>)
            .transpose()?;
        Ok(DatasetFingerprint {
            version: self.version,
            last_change_type,
            last_change_identifier: self.last_change_identifier.clone(),
            items_affected: self.items_affected,
            timestamp: self.changed_at,
        })
    }

    pub fn ack(&self) -> AckState {
        AckState {
            seen_version: self.seen_version,
        }
    }
}
