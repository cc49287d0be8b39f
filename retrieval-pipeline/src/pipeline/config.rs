use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use common::error::AppError;

use crate::{
    calibration::DEFAULT_TEMPERATURE,
    diversity::DEFAULT_SIMILARITY_THRESHOLD,
    expansion::DEFAULT_EXPANSION_CAP,
    metadata::MetadataMatchOptions,
    reranking::LocalRerankWeights,
    scoring::FusionWeights,
    spelling::SpellingThresholds,
    validation::ValidatorPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Embedding-only ranking with spell correction
    Fast,
    /// Larger candidate pool fused with metadata overlap and optional validation
    Deep,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Fast
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fast" | "normal" => Ok(Self::Fast),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown search mode '{other}'")),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchMode::Fast => "fast",
            SearchMode::Deep => "deep",
        };
        f.write_str(label)
    }
}

/// Tunable parameters that govern each search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTuning {
    pub temperature: f32,
    /// Maximum number of expanded terms, the original query included.
    pub expansion_cap: usize,
    pub fast_recall_per_term: usize,
    /// Deep search recalls a wider pool so metadata can promote weaker embedding hits.
    pub deep_recall_per_term: usize,
    pub min_raw_similarity: Option<f32>,
    pub local_rerank_window: usize,
    pub local_weights: LocalRerankWeights,
    pub fusion_weights: FusionWeights,
    pub metadata: MetadataMatchOptions,
    /// Combined score a deep result needs to count as good before relaxation kicks in.
    pub relaxation_threshold: f32,
    pub validator_top_k: usize,
    pub validator_policy: ValidatorPolicy,
    pub diversity_threshold: f32,
    pub spelling: SpellingThresholds,
    pub encoder_timeout_ms: u64,
    pub index_timeout_ms: u64,
    pub validator_timeout_ms: u64,
    /// Upper bound on concurrent collaborator calls within one request.
    pub concurrency: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            expansion_cap: DEFAULT_EXPANSION_CAP,
            fast_recall_per_term: 10,
            deep_recall_per_term: 50,
            min_raw_similarity: None,
            local_rerank_window: 50,
            local_weights: LocalRerankWeights::default(),
            fusion_weights: FusionWeights::default(),
            metadata: MetadataMatchOptions::default(),
            relaxation_threshold: 0.5,
            validator_top_k: 10,
            validator_policy: ValidatorPolicy::default(),
            diversity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            spelling: SpellingThresholds::default(),
            encoder_timeout_ms: 2_000,
            index_timeout_ms: 1_000,
            validator_timeout_ms: 2_000,
            concurrency: 8,
        }
    }
}

impl SearchTuning {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(AppError::Validation(format!(
                "temperature must be positive (got {})",
                self.temperature
            )));
        }
        if self.expansion_cap == 0 || self.concurrency == 0 {
            return Err(AppError::Validation(
                "expansion_cap and concurrency must be positive".to_string(),
            ));
        }
        if self.fast_recall_per_term == 0 || self.deep_recall_per_term == 0 {
            return Err(AppError::Validation(
                "recall sizes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.diversity_threshold) {
            return Err(AppError::Validation(format!(
                "diversity_threshold must lie in [0, 1] (got {})",
                self.diversity_threshold
            )));
        }
        self.local_weights.validate()?;
        self.fusion_weights.validate()?;
        self.metadata.field_weights.validate()?;
        self.validator_policy.validate()
    }

    pub const fn encoder_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_timeout_ms)
    }

    pub const fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    pub const fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms)
    }
}

/// Mode plus tuning for one search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchConfig {
    pub mode: SearchMode,
    pub tuning: SearchTuning,
}

impl SearchConfig {
    pub fn new(mode: SearchMode, tuning: SearchTuning) -> Self {
        Self { mode, tuning }
    }

    pub fn fast() -> Self {
        Self::new(SearchMode::Fast, SearchTuning::default())
    }

    pub fn deep() -> Self {
        Self::new(SearchMode::Deep, SearchTuning::default())
    }

    /// Per-term recall size, never smaller than the number of requested results.
    pub fn recall_per_term(&self, top_k: usize) -> usize {
        let base = match self.mode {
            SearchMode::Fast => self.tuning.fast_recall_per_term,
            SearchMode::Deep => self.tuning.deep_recall_per_term,
        };
        base.max(top_k)
    }
}
