use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use retrieval_pipeline::DEFAULT_SUGGESTIONS;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

const MAX_SUGGESTIONS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SpellCheckParams {
    pub q: String,
}

pub async fn spell_check(
    State(state): State<ApiState>,
    Query(params): Query<SpellCheckParams>,
) -> Result<impl IntoResponse, ApiError> {
    let correction = state.engine.spell_check(&params.q)?;
    Ok(Json(correction))
}

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    pub q: String,
    pub max: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionResponse {
    pub query: String,
    pub suggestions: Vec<String>,
}

pub async fn suggestions(
    State(state): State<ApiState>,
    Query(params): Query<SuggestionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let max = params.max.unwrap_or(DEFAULT_SUGGESTIONS);
    if max == 0 || max > MAX_SUGGESTIONS {
        return Err(ApiError::ValidationError(format!(
            "max must lie between 1 and {MAX_SUGGESTIONS}"
        )));
    }

    let suggestions = state.engine.suggestions(&params.q, max);
    Ok(Json(SuggestionResponse {
        query: params.q,
        suggestions,
    }))
}
