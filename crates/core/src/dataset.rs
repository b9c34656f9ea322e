//! Dataset layout: partitions, image records, and storage path conventions.
//!
//! Images live in storage under `dataset/{set}/...`; thumbnails mirror the
//! same layout under `thumbnails/{set}/...`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Storage prefix holding the image partitions.
pub const DATASET_BASE_DIR: &str = "dataset";

/// Storage prefix holding generated thumbnails.
pub const THUMBNAILS_BASE_DIR: &str = "thumbnails";

/// File extensions recognised as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

// ---------------------------------------------------------------------------
// DatasetSet
// ---------------------------------------------------------------------------

/// Train/valid/test partition an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSet {
    Train,
    Valid,
    Test,
}

impl DatasetSet {
    pub const ALL: [DatasetSet; 3] = [Self::Train, Self::Valid, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Valid => "valid",
            Self::Test => "test",
        }
    }

    /// Storage prefix (with trailing slash) listing this partition's images.
    pub fn storage_prefix(&self) -> String {
        format!("{DATASET_BASE_DIR}/{}/", self.as_str())
    }
}

impl fmt::Display for DatasetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSet {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "valid" => Ok(Self::Valid),
            "test" => Ok(Self::Test),
            _ => Err(CoreError::Validation(format!(
                "Invalid dataset set '{s}'. Must be one of: train, valid, test"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ImageRecord
// ---------------------------------------------------------------------------

/// An image discovered in storage. Identity is the storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    pub set: DatasetSet,
    pub thumbnail_ref: String,
}

impl ImageRecord {
    /// Build a record from a storage path of the form `dataset/{set}/...`.
    ///
    /// Returns `None` for paths outside the dataset tree, in an unknown
    /// partition, or without an image extension.
    pub fn from_storage_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(DATASET_BASE_DIR)?.strip_prefix('/')?;
        let (set, relative) = rest.split_once('/')?;
        let set = set.parse::<DatasetSet>().ok()?;
        if relative.is_empty() || !is_image_path(relative) {
            return None;
        }
        Some(Self {
            path: path.to_string(),
            set,
            thumbnail_ref: format!("{THUMBNAILS_BASE_DIR}/{set}/{relative}"),
        })
    }

    /// Storage path for a new image uploaded into `set` as `filename`.
    pub fn storage_path_for(set: DatasetSet, filename: &str) -> Result<String, CoreError> {
        validate_filename(filename)?;
        Ok(format!("{DATASET_BASE_DIR}/{set}/{filename}"))
    }
}

/// Whether the path ends in one of [`IMAGE_EXTENSIONS`].
pub fn is_image_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Uploaded filenames are a single path segment with an image extension.
pub fn validate_filename(filename: &str) -> Result<(), CoreError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.starts_with('.')
    {
        return Err(CoreError::Validation(format!(
            "Invalid image filename '{filename}'"
        )));
    }
    if !is_image_path(filename) {
        return Err(CoreError::Validation(format!(
            "Unsupported image extension for '{filename}'. Must be one of: {}",
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}
