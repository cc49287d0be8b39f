use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use retrieval_pipeline::{ScoredCandidate, SearchMode, SearchOutcome};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

/// Largest `top_k` accepted by fast search.
pub const FAST_MAX_TOP_K: usize = 100;
/// Deep search fans out wider per term, so it accepts fewer results.
pub const DEEP_MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub id: String,
    pub score: f32,
    pub matched_term: String,
    /// Cosine similarity of the global image embedding to the matched term.
    pub raw_similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_local_similarity: Option<f32>,
    pub final_raw_similarity: f32,
    pub calibrated_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator_score: Option<f32>,
}

impl SearchResult {
    fn from_candidate(rank: usize, candidate: ScoredCandidate) -> Self {
        Self {
            rank,
            score: candidate.combined_score,
            raw_similarity: candidate.raw_similarity,
            raw_local_similarity: candidate.raw_local_similarity,
            final_raw_similarity: candidate.final_raw_similarity,
            calibrated_score: candidate.calibrated_score,
            metadata_score: candidate.metadata_score,
            validator_score: candidate.validator_score,
            matched_term: candidate.matched_term,
            id: candidate.id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub corrected_query: Option<String>,
    pub did_you_mean: Option<String>,
    pub mode: SearchMode,
    pub results: Vec<SearchResult>,
    pub total: usize,
}

impl From<SearchOutcome> for SearchResponse {
    fn from(outcome: SearchOutcome) -> Self {
        let total = outcome.total();
        let results = outcome
            .results
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| SearchResult::from_candidate(index.saturating_add(1), candidate))
            .collect();
        Self {
            query: outcome.query,
            corrected_query: outcome.corrected_query,
            did_you_mean: outcome.did_you_mean,
            mode: outcome.mode,
            results,
            total,
        }
    }
}

pub async fn fast_search(
    State(state): State<ApiState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    run_search(&state, params, SearchMode::Fast).await
}

pub async fn deep_search(
    State(state): State<ApiState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    run_search(&state, params, SearchMode::Deep).await
}

async fn run_search(
    state: &ApiState,
    params: SearchParams,
    mode: SearchMode,
) -> Result<Json<SearchResponse>, ApiError> {
    let max = match mode {
        SearchMode::Fast => FAST_MAX_TOP_K,
        SearchMode::Deep => DEEP_MAX_TOP_K,
    };
    let top_k = match params.top_k {
        Some(requested) if requested > max => {
            return Err(ApiError::ValidationError(format!(
                "top_k must be at most {max} for {mode} search"
            )));
        }
        Some(requested) => requested,
        None => state.config.search_default_top_k.min(max),
    };

    let outcome = state.engine.search(&params.q, top_k, mode, false).await?;
    Ok(Json(SearchResponse::from(outcome)))
}
