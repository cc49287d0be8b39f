use common::error::AppError;
use serde::{Deserialize, Serialize};

const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// One image as it moves through ranking, with every intermediate score kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    /// Best global cosine similarity across the expanded terms.
    pub raw_similarity: f32,
    /// Best per-region similarity, set only for candidates inside the re-rank window.
    pub raw_local_similarity: Option<f32>,
    /// Global and local similarity blended; equals `raw_similarity` outside the window.
    pub final_raw_similarity: f32,
    pub calibrated_score: f32,
    pub metadata_score: Option<f32>,
    pub validator_score: Option<f32>,
    pub combined_score: f32,
    /// Expanded term whose embedding produced `raw_similarity`.
    pub matched_term: String,
}

impl ScoredCandidate {
    pub fn new(id: impl Into<String>, raw_similarity: f32, matched_term: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_similarity,
            raw_local_similarity: None,
            final_raw_similarity: raw_similarity,
            calibrated_score: 0.0,
            metadata_score: None,
            validator_score: None,
            combined_score: 0.0,
            matched_term: matched_term.into(),
        }
    }
}

/// Weights used for linear fusion of the calibrated embedding score and the metadata score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub embedding: f32,
    pub metadata: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            embedding: 0.6,
            metadata: 0.4,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_weight_pair("fusion", self.embedding, self.metadata)
    }
}

/// Rejects negative or non-finite weights and pairs that do not sum to one.
pub fn validate_weight_pair(label: &str, first: f32, second: f32) -> Result<(), AppError> {
    let valid = first.is_finite()
        && second.is_finite()
        && first >= 0.0
        && second >= 0.0
        && ((first + second) - 1.0).abs() <= WEIGHT_SUM_TOLERANCE;
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{label} weights must be non-negative and sum to 1 (got {first} and {second})"
        )))
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn fuse_scores(calibrated: f32, metadata: f32, weights: FusionWeights) -> f32 {
    clamp_unit(metadata.mul_add(weights.metadata, calibrated * weights.embedding))
}

pub fn sort_by_combined_desc(items: &mut [ScoredCandidate]) {
    sort_desc_by(items, |candidate| candidate.combined_score);
}

pub fn sort_by_final_raw_desc(items: &mut [ScoredCandidate]) {
    sort_desc_by(items, |candidate| candidate.final_raw_similarity);
}

/// Descending by `key`, ties by id. NaN keys sort last.
fn sort_desc_by(items: &mut [ScoredCandidate], key: impl Fn(&ScoredCandidate) -> f32) {
    let rank = |candidate: &ScoredCandidate| {
        let value = key(candidate);
        if value.is_nan() {
            f32::NEG_INFINITY
        } else {
            value
        }
    };
    items.sort_by(|a, b| rank(b).total_cmp(&rank(a)).then_with(|| a.id.cmp(&b.id)));
}
