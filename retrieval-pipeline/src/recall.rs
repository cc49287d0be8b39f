use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use common::{
    error::AppError,
    storage::index::VectorIndex,
    utils::embedding::TextEncoder,
};
use futures::{stream, StreamExt};
use tracing::{debug, warn};

use crate::aggregate::TermHits;

/// Encodes each distinct term once, concurrently.
///
/// Terms whose encoding fails or exceeds `timeout` are logged and skipped. Fails with
/// `EncoderUnavailable` only when no term could be encoded.
pub async fn encode_terms(
    terms: &[String],
    encoder: &dyn TextEncoder,
    timeout: Duration,
    concurrency: usize,
) -> Result<HashMap<String, Vec<f32>>, AppError> {
    let mut seen = HashSet::new();
    let unique: Vec<&String> = terms.iter().filter(|term| seen.insert(*term)).collect();
    if unique.is_empty() {
        return Err(AppError::InvalidQuery("no terms to encode".to_string()));
    }

    let calls: Vec<_> = unique
        .iter()
        .map(|term| async move {
            let outcome = match tokio::time::timeout(timeout, encoder.encode_text(term)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::EncoderUnavailable(format!(
                    "encoding timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            ((*term).clone(), outcome)
        })
        .collect();
    let results: Vec<_> = stream::iter(calls)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut embeddings = HashMap::with_capacity(results.len());
    let mut last_error = None;
    for (term, outcome) in results {
        match outcome {
            Ok(embedding) => {
                embeddings.insert(term, embedding);
            }
            Err(err) => {
                warn!(term = %term, error = %err, "Failed to encode query term; skipping");
                last_error = Some(err);
            }
        }
    }

    if embeddings.is_empty() {
        let reason = last_error.map_or_else(|| "no terms encoded".to_string(), |err| err.to_string());
        return Err(AppError::EncoderUnavailable(format!(
            "all {} query terms failed to encode: {reason}",
            unique.len()
        )));
    }

    debug!(
        encoded = embeddings.len(),
        requested = unique.len(),
        "Encoded query terms"
    );
    Ok(embeddings)
}

/// Queries the index once per encoded term, concurrently, and returns hits in term order.
///
/// A term whose query fails or exceeds `timeout` contributes nothing. Fails with
/// `IndexTimeout` only when every attempted term failed.
pub async fn recall_terms(
    terms: &[String],
    embeddings: &HashMap<String, Vec<f32>>,
    index: &dyn VectorIndex,
    top_n: usize,
    timeout: Duration,
    concurrency: usize,
) -> Result<Vec<TermHits>, AppError> {
    if top_n == 0 {
        return Err(AppError::InvalidQuery(
            "recall size must be positive".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let calls = terms
        .iter()
        .filter(|term| seen.insert(*term))
        .filter_map(|term| embeddings.get(term).map(|embedding| (term, embedding)))
        .enumerate()
        .map(|(priority, (term, embedding))| async move {
            let outcome =
                match tokio::time::timeout(timeout, index.query(embedding, top_n)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::IndexTimeout(format!(
                        "recall for '{term}' exceeded {}ms",
                        timeout.as_millis()
                    ))),
                };
            (priority, term.clone(), outcome)
        })
        .collect::<Vec<_>>();

    let attempted = calls.len();
    let mut results: Vec<_> = stream::iter(calls)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(priority, _, _)| *priority);

    let mut per_term = Vec::with_capacity(results.len());
    for (_, term, outcome) in results {
        match outcome {
            Ok(hits) => {
                debug!(term = %term, hits = hits.len(), "Recall finished for term");
                per_term.push(TermHits { term, hits });
            }
            Err(err) => warn!(term = %term, error = %err, "Recall failed for term; skipping"),
        }
    }

    if per_term.is_empty() {
        return Err(AppError::IndexTimeout(format!(
            "recall failed for all {attempted} query terms"
        )));
    }
    Ok(per_term)
}
