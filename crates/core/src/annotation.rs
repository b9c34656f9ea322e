//! Manual annotation types and validation.
//!
//! An [`Annotation`] labels one image as `melon` or `non_melon`. Melon images
//! carry one or more [`BoundingBox`]es in normalised image coordinates, each
//! tagged with a [`Ripeness`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of bounding boxes per image.
pub const MAX_BOXES_PER_IMAGE: usize = 50;

/// Tolerance when checking that a box stays inside the image.
const BOUNDS_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Image-level detection label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLabel {
    Melon,
    NonMelon,
}

impl DetectionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Melon => "melon",
            Self::NonMelon => "non_melon",
        }
    }
}

impl fmt::Display for DetectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "melon" => Ok(Self::Melon),
            "non_melon" => Ok(Self::NonMelon),
            _ => Err(CoreError::InvalidAnnotation(format!(
                "Invalid detection label '{s}'. Must be one of: melon, non_melon"
            ))),
        }
    }
}

/// Per-box ripeness label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ripeness {
    Ripe,
    Unripe,
}

impl Ripeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ripe => "ripe",
            Self::Unripe => "unripe",
        }
    }
}

impl fmt::Display for Ripeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// Axis-aligned box; `x`/`y` is the top-left corner. All values are fractions
/// of the image width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub ripeness: Ripeness,
}

impl BoundingBox {
    fn validate(&self, index: usize) -> Result<(), CoreError> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidAnnotation(format!(
                "box {index}: coordinates must be finite numbers"
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(CoreError::InvalidAnnotation(format!(
                "box {index}: width and height must be positive"
            )));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(CoreError::InvalidAnnotation(format!(
                "box {index}: x and y must be within the image"
            )));
        }
        if self.x + self.width > 1.0 + BOUNDS_EPSILON || self.y + self.height > 1.0 + BOUNDS_EPSILON
        {
            return Err(CoreError::InvalidAnnotation(format!(
                "box {index}: extends past the image bounds"
            )));
        }
        Ok(())
    }
}

/// The full manual label for one image. Submissions replace it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub detection_label: DetectionLabel,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
}

impl Annotation {
    pub fn non_melon() -> Self {
        Self {
            detection_label: DetectionLabel::NonMelon,
            boxes: Vec::new(),
        }
    }

    pub fn melon(boxes: Vec<BoundingBox>) -> Self {
        Self {
            detection_label: DetectionLabel::Melon,
            boxes,
        }
    }

    /// Check the label/box invariants.
    ///
    /// - `non_melon` must have no boxes.
    /// - `melon` needs at least one box and at most [`MAX_BOXES_PER_IMAGE`].
    /// - Every box is inside the image with positive size.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.detection_label {
            DetectionLabel::NonMelon if !self.boxes.is_empty() => {
                return Err(CoreError::InvalidAnnotation(format!(
                    "non_melon images cannot have bounding boxes (got {})",
                    self.boxes.len()
                )));
            }
            DetectionLabel::Melon if self.boxes.is_empty() => {
                return Err(CoreError::InvalidAnnotation(
                    "melon images need at least one bounding box".to_string(),
                ));
            }
            _ => {}
        }
        if self.boxes.len() > MAX_BOXES_PER_IMAGE {
            return Err(CoreError::InvalidAnnotation(format!(
                "{} bounding boxes given, maximum is {MAX_BOXES_PER_IMAGE}",
                self.boxes.len()
            )));
        }
        for (i, b) in self.boxes.iter().enumerate() {
            b.validate(i)?;
        }
        Ok(())
    }

    /// Count of boxes per ripeness, `(ripe, unripe)`.
    pub fn ripeness_counts(&self) -> (usize, usize) {
        self.boxes.iter().fold((0, 0), |(r, u), b| match b.ripeness {
            Ripeness::Ripe => (r + 1, u),
            Ripeness::Unripe => (r, u + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn bbox(x: f64, y: f64, w: f64, h: f64) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            ripeness: Ripeness::Ripe,
        }
    }

    #[test]
    fn non_melon_without_boxes_is_valid() {
        assert!(Annotation::non_melon().validate().is_ok());
    }

    #[test]
    fn non_melon_with_boxes_is_rejected() {
        let mut a = Annotation::non_melon();
        a.boxes.push(bbox(0.1, 0.1, 0.2, 0.2));
        assert_matches!(a.validate(), Err(CoreError::InvalidAnnotation(_)));
    }

    #[test]
    fn melon_requires_a_box() {
        assert_matches!(
            Annotation::melon(vec![]).validate(),
            Err(CoreError::InvalidAnnotation(_))
        );
    }

    #[test]
    fn box_must_have_positive_size() {
        let a = Annotation::melon(vec![bbox(0.1, 0.1, 0.0, 0.2)]);
        assert_matches!(a.validate(), Err(CoreError::InvalidAnnotation(_)));
    }

    #[test]
    fn box_must_stay_in_bounds() {
        assert!(Annotation::melon(vec![bbox(0.5, 0.5, 0.5, 0.5)]).validate().is_ok());
        assert_matches!(
            Annotation::melon(vec![bbox(0.6, 0.1, 0.5, 0.2)]).validate(),
            Err(CoreError::InvalidAnnotation(_))
        );
        assert_matches!(
            Annotation::melon(vec![bbox(-0.1, 0.1, 0.2, 0.2)]).validate(),
            Err(CoreError::InvalidAnnotation(_))
        );
    }

    #[test]
    fn nan_coordinates_are_rejected() {
        let a = Annotation::melon(vec![bbox(f64::NAN, 0.1, 0.2, 0.2)]);
        assert_matches!(a.validate(), Err(CoreError::InvalidAnnotation(_)));
    }

    #[test]
    fn too_many_boxes() {
        let boxes = vec![bbox(0.0, 0.0, 0.01, 0.01); MAX_BOXES_PER_IMAGE + 1];
        assert_matches!(
            Annotation::melon(boxes).validate(),
            Err(CoreError::InvalidAnnotation(_))
        );
    }

    #[test]
    fn deserializes_from_wire_format() {
        let a: Annotation = serde_json::from_value(serde_json::json!({
            "detection_label": "melon",
            "boxes": [{"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.4, "ripeness": "unripe"}]
        }))
        .unwrap();
        assert_eq!(a.ripeness_counts(), (0, 1));
        assert!(a.validate().is_ok());
    }
}
