//! Reconciling multiple model outputs: majority vote over predictions and
//! best-model ranking over evaluation metrics.

use std::cmp::Ordering;

use serde::Serialize;

use crate::model::{ModelEntry, PerModelResult, PrimaryMetric};

// ---------------------------------------------------------------------------
// Majority vote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "label", rename_all = "snake_case")]
pub enum Verdict {
    Decided(String),
    /// No model produced a usable prediction.
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MajorityVote {
    pub verdict: Verdict,
    pub agreement_count: usize,
    pub total_voting: usize,
    /// Mean confidence of the models that agreed with the verdict.
    pub mean_confidence: Option<f64>,
}

struct Tally<'a> {
    label: &'a str,
    count: usize,
    confidence_sum: f64,
}

impl Tally<'_> {
    fn mean(&self) -> f64 {
        self.confidence_sum / self.count as f64
    }
}

/// Count error-free predictions per label and pick the most common one.
///
/// Count ties go to the label with the higher mean confidence; a full tie goes
/// to the label that voted first, so the result follows registry order.
pub fn majority_vote(results: &[PerModelResult]) -> MajorityVote {
    let mut tallies: Vec<Tally<'_>> = Vec::new();
    let mut total_voting = 0;

    for prediction in results
        .iter()
        .filter(|r| r.error.is_none())
        .filter_map(|r| r.prediction.as_ref())
    {
        total_voting += 1;
        let confidence = if prediction.confidence.is_finite() {
            prediction.confidence
        } else {
            0.0
        };
        match tallies.iter_mut().find(|t| t.label == prediction.label) {
            Some(t) => {
                t.count += 1;
                t.confidence_sum += confidence;
            }
            None => tallies.push(Tally {
                label: &prediction.label,
                count: 1,
                confidence_sum: confidence,
            }),
        }
    }

    // `tallies` is in first-vote order; only replace the leader on a strict win.
    let mut winner: Option<&Tally<'_>> = None;
    for t in &tallies {
        let better = match winner {
            None => true,
            Some(w) => t.count > w.count || (t.count == w.count && t.mean() > w.mean()),
        };
        if better {
            winner = Some(t);
        }
    }

    match winner {
        Some(w) => MajorityVote {
            verdict: Verdict::Decided(w.label.to_string()),
            agreement_count: w.count,
            total_voting,
            mean_confidence: Some(w.mean()),
        },
        None => MajorityVote {
            verdict: Verdict::Indeterminate,
            agreement_count: 0,
            total_voting: 0,
            mean_confidence: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Entries with a usable `metric`, best first. Ties go to the most recently
/// trained model, then to the lexically smaller key.
pub fn rank_models(entries: &[ModelEntry], metric: PrimaryMetric) -> Vec<(ModelEntry, f64)> {
    let mut scored: Vec<(ModelEntry, f64)> = entries
        .iter()
        .filter_map(|e| {
            let score = e.metrics.as_ref()?.value(metric)?;
            Some((e.clone(), score))
        })
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.last_trained_at.cmp(&a.last_trained_at))
            .then_with(|| a.key.cmp(&b.key))
    });
    scored
}

/// Top of [`rank_models`], or `None` when nothing has been evaluated.
pub fn best_model(entries: &[ModelEntry], metric: PrimaryMetric) -> Option<ModelEntry> {
    rank_models(entries, metric).into_iter().next().map(|(e, _)| e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metrics, ModelTask, Prediction};
    use chrono::{Duration, Utc};

    fn vote(key: &str, label: &str, confidence: f64) -> PerModelResult {
        PerModelResult::ok(
            key,
            key,
            Prediction {
                label: label.to_string(),
                confidence,
                raw: serde_json::Value::Null,
            },
        )
    }

    fn entry(key: &str, f1: Option<f64>, trained_mins_ago: Option<i64>) -> ModelEntry {
        ModelEntry {
            key: key.to_string(),
            task: ModelTask::Detector,
            display_name: key.to_string(),
            metrics: f1.map(|f| Metrics {
                f1_score: Some(f),
                ..Default::default()
            }),
            last_trained_at: trained_mins_ago.map(|m| Utc::now() - Duration::minutes(m)),
        }
    }

    #[test]
    fn majority_wins() {
        let results = vec![
            vote("a", "melon", 0.9),
            vote("b", "melon", 0.6),
            vote("c", "non_melon", 0.95),
        ];
        let v = majority_vote(&results);
        assert_eq!(v.verdict, Verdict::Decided("melon".into()));
        assert_eq!(v.agreement_count, 2);
        assert_eq!(v.total_voting, 3);
        assert!((v.mean_confidence.unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn count_tie_breaks_on_mean_confidence() {
        let results = vec![vote("a", "ripe", 0.55), vote("b", "unripe", 0.8)];
        let v = majority_vote(&results);
        assert_eq!(v.verdict, Verdict::Decided("unripe".into()));
        assert_eq!(v.agreement_count, 1);
        assert_eq!(v.total_voting, 2);
    }

    #[test]
    fn full_tie_goes_to_first_voter() {
        let results = vec![vote("a", "ripe", 0.5), vote("b", "unripe", 0.5)];
        assert_eq!(majority_vote(&results).verdict, Verdict::Decided("ripe".into()));
    }

    #[test]
    fn failed_models_do_not_vote() {
        let results = vec![
            PerModelResult::failed("a", "a", "timeout"),
            vote("b", "non_melon", 0.7),
        ];
        let v = majority_vote(&results);
        assert_eq!(v.verdict, Verdict::Decided("non_melon".into()));
        assert_eq!(v.total_voting, 1);
    }

    #[test]
    fn no_usable_results_is_indeterminate() {
        let results = vec![PerModelResult::failed("a", "a", "crashed")];
        let v = majority_vote(&results);
        assert_eq!(v.verdict, Verdict::Indeterminate);
        assert_eq!(v.total_voting, 0);
        assert_eq!(majority_vote(&[]).verdict, Verdict::Indeterminate);
    }

    #[test]
    fn verdict_serialization() {
        assert_eq!(
            serde_json::to_value(Verdict::Decided("melon".into())).unwrap(),
            serde_json::json!({"status": "decided", "label": "melon"})
        );
        assert_eq!(
            serde_json::to_value(Verdict::Indeterminate).unwrap(),
            serde_json::json!({"status": "indeterminate"})
        );
    }

    #[test]
    fn best_model_by_metric() {
        let entries = vec![
            entry("nb", Some(0.71), Some(30)),
            entry("rf", Some(0.88), Some(60)),
            entry("knn", None, None),
        ];
        assert_eq!(best_model(&entries, PrimaryMetric::F1).unwrap().key, "rf");
        assert_eq!(rank_models(&entries, PrimaryMetric::F1).len(), 2);
    }

    #[test]
    fn metric_tie_goes_to_most_recently_trained() {
        let entries = vec![
            entry("old", Some(0.9), Some(120)),
            entry("new", Some(0.9), Some(5)),
            entry("never", Some(0.9), None),
        ];
        let ranked: Vec<_> = rank_models(&entries, PrimaryMetric::F1)
            .into_iter()
            .map(|(e, _)| e.key)
            .collect();
        assert_eq!(ranked, vec!["new", "old", "never"]);
    }

    #[test]
    fn nothing_evaluated_yields_none() {
        assert!(best_model(&[entry("x", None, None)], PrimaryMetric::F1).is_none());
    }
}
