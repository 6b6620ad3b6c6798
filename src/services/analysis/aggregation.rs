// Aggregation Logic
// Combines per-chunk distributions into one document-level distribution

use crate::models::{AggregationMethod, ChunkPrediction, ClassProbabilities};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::classifier::ClassifierProfile;

/// Document-level distribution plus the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub distribution: ClassProbabilities,
    pub method: AggregationMethod,
    pub chunk_count: usize,
}

fn weight_of(prediction: &ChunkPrediction) -> f64 {
    let w = prediction.model_confidence;
    if w.is_finite() {
        w.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Canonical order so floating-point sums do not depend on input order.
fn canonical_order<'a>(
    profile: &ClassifierProfile,
    predictions: &'a [ChunkPrediction],
) -> Vec<&'a ChunkPrediction> {
    let mut ordered: Vec<&ChunkPrediction> = predictions.iter().collect();
    ordered.sort_by(|a, b| {
        weight_of(a).total_cmp(&weight_of(b)).then_with(|| {
            profile
                .labels()
                .iter()
                .map(|l| a.probabilities.get(l).total_cmp(&b.probabilities.get(l)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
    });
    ordered
}

/// Confidence-weighted mean of chunk distributions.
///
/// `aggregated[label] = Σ(wᵢ·pᵢ[label]) / Σ(wᵢ)` with `wᵢ` the chunk's own
/// top-label probability. Falls back to the unweighted mean when every weight
/// is zero. Returns `None` when there is nothing to aggregate.
pub fn aggregate_predictions(
    profile: &ClassifierProfile,
    predictions: &[ChunkPrediction],
) -> Option<Aggregate> {
    if predictions.is_empty() {
        return None;
    }

    let ordered = canonical_order(profile, predictions);
    let total_weight: f64 = ordered.iter().map(|p| weight_of(p)).sum();

    let (method, weights): (AggregationMethod, Vec<f64>) = if total_weight > f64::EPSILON {
        (
            AggregationMethod::ConfidenceWeighted,
            ordered.iter().map(|p| weight_of(p)).collect(),
        )
    } else {
        (AggregationMethod::UnweightedMean, vec![1.0; ordered.len()])
    };
    let weight_sum: f64 = weights.iter().sum();

    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for label in profile.labels() {
        let mass: f64 = ordered
            .iter()
            .zip(weights.iter())
            .map(|(p, w)| w * p.probabilities.get(label))
            .sum();
        scores.insert(label.clone(), mass / weight_sum);
    }

    // Guard against drift from inputs that were only approximately normalized.
    let total: f64 = scores.values().sum();
    if total > 0.0 {
        for value in scores.values_mut() {
            *value /= total;
        }
    }

    let (label, confidence) = profile.argmax(&scores);
    Some(Aggregate {
        distribution: ClassProbabilities {
            label,
            confidence,
            scores,
        },
        method,
        chunk_count: predictions.len(),
    })
}
