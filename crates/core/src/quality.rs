//! Dataset quality checks: partition split against target ratios and class
//! balance inside each partition.
//!
//! Counts come from manual annotations only. Detector balance compares
//! `melon` and `non_melon` images; classifier balance compares `ripe` and
//! `unripe` boxes.

use serde::Serialize;

use crate::annotation::{Annotation, DetectionLabel, Ripeness};
use crate::dataset::{DatasetSet, ImageRecord};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

pub const TARGET_TRAIN_RATIO: f64 = 0.70;
pub const TARGET_VALID_RATIO: f64 = 0.15;
pub const TARGET_TEST_RATIO: f64 = 0.15;

/// Allowed deviation of a partition's share from its target.
pub const SPLIT_TOLERANCE: f64 = 0.10;

/// Allowed deviation of the melon share from an even split.
pub const DETECTOR_BALANCE_TOLERANCE: f64 = 0.20;

/// Allowed deviation of the ripe share from an even split.
pub const CLASSIFIER_BALANCE_TOLERANCE: f64 = 0.10;

pub fn target_ratio(set: DatasetSet) -> f64 {
    match set {
        DatasetSet::Train => TARGET_TRAIN_RATIO,
        DatasetSet::Valid => TARGET_VALID_RATIO,
        DatasetSet::Test => TARGET_TEST_RATIO,
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Annotated class counts of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SetComposition {
    pub set: DatasetSet,
    pub annotated: u64,
    pub melon: u64,
    pub non_melon: u64,
    pub ripe_boxes: u64,
    pub unripe_boxes: u64,
}

impl SetComposition {
    fn empty(set: DatasetSet) -> Self {
        Self {
            set,
            annotated: 0,
            melon: 0,
            non_melon: 0,
            ripe_boxes: 0,
            unripe_boxes: 0,
        }
    }
}

/// A partition's share of the annotated dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SplitShare {
    pub set: DatasetSet,
    pub ratio: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyDataset,
    SplitRatio,
    DetectorImbalance,
    ClassifierImbalance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityIssue {
    pub kind: IssueKind,
    pub set: Option<DatasetSet>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_annotated: u64,
    pub composition: Vec<SetComposition>,
    pub split: Vec<SplitShare>,
    pub issues: Vec<QualityIssue>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Tally annotations into one [`SetComposition`] per partition, in
/// [`DatasetSet::ALL`] order.
pub fn compose<'a, I>(annotated: I) -> Vec<SetComposition>
where
    I: IntoIterator<Item = (&'a ImageRecord, &'a Annotation)>,
{
    let mut sets = DatasetSet::ALL.map(SetComposition::empty);
    for (record, annotation) in annotated {
        let Some(entry) = sets.iter_mut().find(|c| c.set == record.set) else {
            continue;
        };
        entry.annotated += 1;
        match annotation.detection_label {
            DetectionLabel::Melon => entry.melon += 1,
            DetectionLabel::NonMelon => entry.non_melon += 1,
        }
        for b in &annotation.boxes {
            match b.ripeness {
                Ripeness::Ripe => entry.ripe_boxes += 1,
                Ripeness::Unripe => entry.unripe_boxes += 1,
            }
        }
    }
    sets.to_vec()
}

/// Check the split and per-partition class balance.
pub fn analyze(composition: Vec<SetComposition>) -> QualityReport {
    let total: u64 = composition.iter().map(|c| c.annotated).sum();
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if total == 0 {
        issues.push(QualityIssue {
            kind: IssueKind::EmptyDataset,
            set: None,
            message: "The dataset has no annotated images".to_string(),
        });
        recommendations
            .push("Annotate images in every partition before training".to_string());
        return QualityReport {
            total_annotated: 0,
            composition,
            split: Vec::new(),
            issues,
            recommendations,
        };
    }

    let split: Vec<SplitShare> = composition
        .iter()
        .map(|c| SplitShare {
            set: c.set,
            ratio: c.annotated as f64 / total as f64,
            target: target_ratio(c.set),
        })
        .collect();

    let mut split_off = false;
    for share in &split {
        if (share.ratio - share.target).abs() > SPLIT_TOLERANCE {
            split_off = true;
            issues.push(QualityIssue {
                kind: IssueKind::SplitRatio,
                set: Some(share.set),
                message: format!(
                    "'{}' holds {:.1}% of annotated images, target is {:.1}%",
                    share.set,
                    share.ratio * 100.0,
                    share.target * 100.0
                ),
            });
        }
    }
    if split_off {
        recommendations.push(
            "Move images between partitions to bring the train/valid/test split back to 70/15/15"
                .to_string(),
        );
    }

    for c in &composition {
        if let Some(melon_share) = share_of(c.melon, c.non_melon) {
            if (melon_share - 0.5).abs() > DETECTOR_BALANCE_TOLERANCE {
                issues.push(QualityIssue {
                    kind: IssueKind::DetectorImbalance,
                    set: Some(c.set),
                    message: format!(
                        "Detector classes in '{}' are imbalanced: melon {:.0}% vs non_melon {:.0}%",
                        c.set,
                        melon_share * 100.0,
                        (1.0 - melon_share) * 100.0
                    ),
                });
                recommendations.push(format!(
                    "Add images of the minority detection class to '{}' or resample it when training the detectors",
                    c.set
                ));
            }
        }
    }

    for c in &composition {
        if let Some(ripe_share) = share_of(c.ripe_boxes, c.unripe_boxes) {
            if (ripe_share - 0.5).abs() > CLASSIFIER_BALANCE_TOLERANCE {
                issues.push(QualityIssue {
                    kind: IssueKind::ClassifierImbalance,
                    set: Some(c.set),
                    message: format!(
                        "Ripeness classes in '{}' are imbalanced: ripe {:.0}% vs unripe {:.0}%",
                        c.set,
                        ripe_share * 100.0,
                        (1.0 - ripe_share) * 100.0
                    ),
                });
                recommendations.push(format!(
                    "Annotate more melons of the minority ripeness in '{}' or rebalance it when training the classifiers",
                    c.set
                ));
            }
        }
    }

    QualityReport {
        total_annotated: total,
        composition,
        split,
        issues,
        recommendations,
    }
}

/// `a / (a + b)`, or `None` when both are zero.
fn share_of(a: u64, b: u64) -> Option<f64> {
    let total = a + b;
    (total > 0).then(|| a as f64 / total as f64)
}
