use crate::{diversity::DiversityStats, spelling::SpellCorrection};

#[derive(Debug, Clone, Default)]
pub struct RecallStats {
    pub terms_requested: usize,
    pub terms_encoded: usize,
    pub terms_recalled: usize,
    pub total_hits: usize,
    pub unique_candidates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationStats {
    pub kept: usize,
    pub dropped: usize,
    pub top_scores: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct RelaxationStats {
    pub good_before: usize,
    pub good_after: usize,
    pub applied: bool,
    pub improved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationStats {
    pub sent: usize,
    pub adjusted: usize,
    pub dropped: usize,
    pub unavailable: usize,
}

/// Optional per-run details, captured only when requested.
#[derive(Debug, Clone, Default)]
pub struct PipelineDiagnostics {
    pub correction: Option<SpellCorrection>,
    pub expanded_terms: Vec<String>,
    pub recall: Option<RecallStats>,
    pub reranked_window: Option<usize>,
    pub calibration: Option<CalibrationStats>,
    pub relaxation: Option<RelaxationStats>,
    pub validation: Option<ValidationStats>,
    pub diversity: Option<DiversityStats>,
}
