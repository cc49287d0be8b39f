use common::{storage::index::EmbeddingStore, utils::embedding::cosine_similarity};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::scoring::ScoredCandidate;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiversityOutcome {
    Kept,
    /// Too close to an already kept candidate.
    Dropped,
    /// Kept without comparison because its embedding could not be read.
    KeptUnchecked,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiversityStats {
    pub considered: usize,
    pub kept: usize,
    pub dropped: usize,
    pub unchecked: usize,
}

/// Greedy near-duplicate removal over an already sorted list.
///
/// A candidate is admitted only if its global embedding has cosine similarity below
/// `threshold` with every admitted one. Embeddings are fetched `concurrency` candidates at a
/// time and fetching stops once `top_k` candidates are admitted.
pub async fn diversify(
    candidates: Vec<ScoredCandidate>,
    store: &dyn EmbeddingStore,
    threshold: f32,
    top_k: usize,
    concurrency: usize,
) -> (Vec<ScoredCandidate>, DiversityStats) {
    let chunk = concurrency.max(1);
    let mut stats = DiversityStats::default();
    let mut kept = Vec::with_capacity(top_k.min(candidates.len()));
    let mut kept_embeddings: Vec<Vec<f32>> = Vec::new();
    let mut pending = candidates.into_iter();

    while kept.len() < top_k {
        let batch: Vec<ScoredCandidate> = pending.by_ref().take(chunk).collect();
        if batch.is_empty() {
            break;
        }
        let globals = fetch_globals(&batch, store, chunk).await;

        for (candidate, global) in batch.into_iter().zip(globals) {
            if kept.len() >= top_k {
                break;
            }
            stats.considered = stats.considered.saturating_add(1);

            let outcome = match &global {
                None => DiversityOutcome::KeptUnchecked,
                Some(embedding) => {
                    let too_close = kept_embeddings
                        .iter()
                        .any(|other| cosine_similarity(embedding, other) >= threshold);
                    if too_close {
                        DiversityOutcome::Dropped
                    } else {
                        DiversityOutcome::Kept
                    }
                }
            };

            match outcome {
                DiversityOutcome::Dropped => {
                    debug!(candidate_id = %candidate.id, "Dropping near-duplicate");
                    stats.dropped = stats.dropped.saturating_add(1);
                }
                DiversityOutcome::KeptUnchecked => {
                    stats.unchecked = stats.unchecked.saturating_add(1);
                    stats.kept = stats.kept.saturating_add(1);
                    kept.push(candidate);
                }
                DiversityOutcome::Kept => {
                    if let Some(embedding) = global {
                        kept_embeddings.push(embedding);
                    }
                    stats.kept = stats.kept.saturating_add(1);
                    kept.push(candidate);
                }
            }
        }
    }

    (kept, stats)
}

/// Global embeddings for `batch`, in batch order. Failed or missing lookups yield `None`.
async fn fetch_globals(
    batch: &[ScoredCandidate],
    store: &dyn EmbeddingStore,
    concurrency: usize,
) -> Vec<Option<Vec<f32>>> {
    let lookups: Vec<_> = batch
        .iter()
        .map(|candidate| {
            let id = candidate.id.clone();
            async move {
                match store.get_embeddings(&id).await {
                    Ok(found) => found.map(|embeddings| embeddings.global),
                    Err(err) => {
                        warn!(candidate_id = %id, error = %err, "Embedding lookup failed during diversity filtering");
                        None
                    }
                }
            }
        })
        .collect();
    stream::iter(lookups).buffered(concurrency).collect().await
}
