use std::collections::HashMap;

use common::storage::index::VectorHit;
use tracing::warn;

use crate::scoring::{sort_by_final_raw_desc, ScoredCandidate};

/// Hits returned for one expanded term.
#[derive(Debug, Clone)]
pub struct TermHits {
    pub term: String,
    pub hits: Vec<VectorHit>,
}

/// Merges per-term hit lists into one candidate per image id.
///
/// `per_term` must be in term priority order: each image keeps its highest raw similarity
/// and the term that produced it, and equal scores keep the earlier term. Hits below
/// `min_raw_similarity` and non-finite scores are ignored. Output is sorted by score, ties
/// broken by id.
pub fn merge_term_hits(
    per_term: Vec<TermHits>,
    min_raw_similarity: Option<f32>,
) -> Vec<ScoredCandidate> {
    let mut best: HashMap<String, ScoredCandidate> = HashMap::new();

    for TermHits { term, hits } in per_term {
        for hit in hits {
            if !hit.score.is_finite() {
                warn!(candidate_id = %hit.id, term = %term, score = hit.score, "Dropping non-finite similarity");
                continue;
            }
            if min_raw_similarity.is_some_and(|min| hit.score < min) {
                continue;
            }
            best.entry(hit.id.clone())
                .and_modify(|existing| {
                    if hit.score > existing.raw_similarity {
                        *existing = ScoredCandidate::new(&hit.id, hit.score, &term);
                    }
                })
                .or_insert_with(|| ScoredCandidate::new(&hit.id, hit.score, &term));
        }
    }

    let mut merged: Vec<ScoredCandidate> = best.into_values().collect();
    sort_by_final_raw_desc(&mut merged);
    merged
}
