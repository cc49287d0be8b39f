use std::collections::HashMap;

use common::{
    error::AppError,
    storage::index::EmbeddingStore,
    utils::embedding::cosine_similarity,
};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::scoring::{sort_by_final_raw_desc, validate_weight_pair, ScoredCandidate};

/// Blend between whole-image similarity and best sub-region similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalRerankWeights {
    pub global: f32,
    pub local: f32,
}

impl Default for LocalRerankWeights {
    fn default() -> Self {
        Self {
            global: 0.7,
            local: 0.3,
        }
    }
}

impl LocalRerankWeights {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_weight_pair("local re-rank", self.global, self.local)
    }

    pub fn blend(&self, global: f32, local: f32) -> f32 {
        local.mul_add(self.local, global * self.global)
    }
}

/// Highest similarity between the query and any region embedding.
pub fn max_local_similarity(query: &[f32], locals: &[Vec<f32>]) -> Option<f32> {
    locals
        .iter()
        .map(|local| cosine_similarity(query, local))
        .filter(|score| score.is_finite())
        .reduce(f32::max)
}

/// Refines the first `window` candidates with their region embeddings and re-sorts.
///
/// Each candidate is compared against the embedding of its own matched term. Candidates
/// without region embeddings (or whose lookup fails) fall back to the global similarity;
/// candidates past the window are left as they are.
pub async fn rerank_window(
    candidates: &mut Vec<ScoredCandidate>,
    window: usize,
    term_embeddings: &HashMap<String, Vec<f32>>,
    store: &dyn EmbeddingStore,
    weights: LocalRerankWeights,
    concurrency: usize,
) {
    let window = window.min(candidates.len());
    if window == 0 {
        return;
    }

    let lookups: Vec<_> = candidates
        .iter()
        .take(window)
        .enumerate()
        .map(|(slot, candidate)| {
            let id = candidate.id.clone();
            async move { (slot, store.get_embeddings(&id).await) }
        })
        .collect();
    let fetched: Vec<_> = stream::iter(lookups)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut with_locals = 0usize;
    for (slot, lookup) in fetched {
        let Some(candidate) = candidates.get_mut(slot) else {
            continue;
        };
        let locals = match lookup {
            Ok(Some(embeddings)) => embeddings.locals,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(candidate_id = %candidate.id, error = %err, "Region embedding lookup failed");
                Vec::new()
            }
        };

        let local = term_embeddings
            .get(&candidate.matched_term)
            .and_then(|query| max_local_similarity(query, &locals));
        if local.is_some() {
            with_locals = with_locals.saturating_add(1);
        }
        let local = local.unwrap_or(candidate.raw_similarity);

        candidate.raw_local_similarity = Some(local);
        candidate.final_raw_similarity = weights.blend(candidate.raw_similarity, local);
    }

    debug!(window, with_locals, "Applied local re-ranking");
    sort_by_final_raw_desc(candidates);
}
