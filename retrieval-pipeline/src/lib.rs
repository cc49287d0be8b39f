pub mod aggregate;
pub mod calibration;
pub mod diversity;
pub mod expansion;
pub mod metadata;
pub mod pipeline;
pub mod recall;
pub mod reranking;
pub mod scoring;
pub mod spelling;
pub mod validation;

use common::error::AppError;
use serde::Serialize;
use tracing::instrument;

pub use pipeline::{
    PipelineDiagnostics, PipelineStageTimings, QueryLexicon, SearchConfig, SearchMode,
    SearchServices, SearchTuning, StageKind,
};
pub use scoring::ScoredCandidate;
pub use spelling::SpellCorrection;

/// Default number of suggestions returned when the caller does not ask for a count.
pub const DEFAULT_SUGGESTIONS: usize = 3;

/// Ranked answer to one search request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    /// Query actually searched, when spell correction changed it.
    pub corrected_query: Option<String>,
    pub did_you_mean: Option<String>,
    pub mode: SearchMode,
    pub results: Vec<ScoredCandidate>,
    #[serde(skip)]
    pub stage_timings: PipelineStageTimings,
    #[serde(skip)]
    pub diagnostics: Option<PipelineDiagnostics>,
}

impl SearchOutcome {
    pub fn total(&self) -> usize {
        self.results.len()
    }
}

/// Entry point for searches. Holds the shared collaborators, lookup tables and tuning,
/// all immutable after construction.
#[derive(Clone)]
pub struct SearchEngine {
    services: SearchServices,
    lexicon: QueryLexicon,
    tuning: SearchTuning,
}

impl SearchEngine {
    pub fn new(
        services: SearchServices,
        lexicon: QueryLexicon,
        tuning: SearchTuning,
    ) -> Result<Self, AppError> {
        tuning.validate()?;
        Ok(Self {
            services,
            lexicon,
            tuning,
        })
    }

    /// Engine over the built-in expansion table, spelling thresholds taken from `tuning`.
    pub fn with_builtin_lexicon(
        services: SearchServices,
        tuning: SearchTuning,
    ) -> Result<Self, AppError> {
        let lexicon = QueryLexicon::builtin(tuning.spelling);
        Self::new(services, lexicon, tuning)
    }

    pub fn tuning(&self) -> &SearchTuning {
        &self.tuning
    }

    pub fn has_validator(&self) -> bool {
        self.services.validator.is_some()
    }

    pub async fn fast_search(&self, query: &str, top_k: usize) -> Result<SearchOutcome, AppError> {
        self.search(query, top_k, SearchMode::Fast, false).await
    }

    pub async fn deep_search(&self, query: &str, top_k: usize) -> Result<SearchOutcome, AppError> {
        self.search(query, top_k, SearchMode::Deep, false).await
    }

    /// Runs one search in `mode`. Blank queries and a zero `top_k` are rejected before any
    /// collaborator is called.
    #[instrument(skip_all, fields(mode = %mode, top_k = top_k))]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        mode: SearchMode,
        capture_diagnostics: bool,
    ) -> Result<SearchOutcome, AppError> {
        validate_request(query, top_k)?;

        let config = SearchConfig::new(mode, self.tuning.clone());
        let run = pipeline::run_pipeline(
            &self.services,
            &self.lexicon,
            query,
            top_k,
            &config,
            capture_diagnostics,
        )
        .await?;

        let hits = run.results;
        let (corrected_query, did_you_mean) = match hits.correction {
            Some(correction) => (
                correction.was_corrected.then_some(correction.corrected),
                correction.suggestion,
            ),
            None => (None, None),
        };

        Ok(SearchOutcome {
            query: query.trim().to_owned(),
            corrected_query,
            did_you_mean,
            mode,
            results: hits.results,
            stage_timings: run.stage_timings,
            diagnostics: run.diagnostics,
        })
    }

    pub fn spell_check(&self, query: &str) -> Result<SpellCorrection, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidQuery("query must not be blank".to_string()));
        }
        Ok(self.lexicon.speller.correct(query))
    }

    pub fn suggestions(&self, query: &str, max: usize) -> Vec<String> {
        spelling::suggestions(query, &self.lexicon.expansion, max)
    }
}

fn validate_request(query: &str, top_k: usize) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(AppError::InvalidQuery("query must not be blank".to_string()));
    }
    if top_k == 0 {
        return Err(AppError::InvalidQuery("top_k must be positive".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        storage::{
            corpus::InMemoryCorpus,
            types::image_record::{ImageMetadata, ImageRecord},
        },
        utils::embedding::TextEncoder,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Points every term at the first axis and counts calls.
    #[derive(Default)]
    struct CountingEncoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextEncoder for CountingEncoder {
        async fn encode_text(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn engine(encoder: Arc<CountingEncoder>) -> SearchEngine {
        let corpus = InMemoryCorpus::from_records(vec![
            ImageRecord::new("beach-dog", vec![0.9, 0.1, 0.0]).with_metadata(ImageMetadata {
                caption: Some("dog on the beach".to_owned()),
                ..ImageMetadata::default()
            }),
            ImageRecord::new("mountain", vec![0.1, 0.9, 0.0]),
        ])
        .expect("corpus");
        let services = SearchServices::from_corpus(encoder, Arc::new(corpus), None);
        SearchEngine::with_builtin_lexicon(services, SearchTuning::default()).expect("engine")
    }

    #[tokio::test]
    async fn blank_query_and_zero_top_k_are_rejected_before_encoding() {
        let encoder = Arc::new(CountingEncoder::default());
        let engine = engine(Arc::clone(&encoder));

        let blank = engine.fast_search("   ", 5).await;
        assert!(matches!(blank, Err(AppError::InvalidQuery(_))));
        let zero = engine.deep_search("dog", 0).await;
        assert!(matches!(zero, Err(AppError::InvalidQuery(_))));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn searches_in_memory_corpus() {
        let encoder = Arc::new(CountingEncoder::default());
        let engine = engine(Arc::clone(&encoder));

        let outcome = engine.deep_search("dog", 5).await.expect("search");

        assert_eq!(outcome.mode, SearchMode::Deep);
        assert_eq!(outcome.query, "dog");
        assert!(outcome.corrected_query.is_none());
        assert_eq!(outcome.results[0].id, "beach-dog");
        assert_eq!(outcome.total(), 2);
        // "dog" expands to six terms and each distinct term is encoded once.
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn only_fast_search_reports_a_corrected_query() {
        let engine = engine(Arc::new(CountingEncoder::default()));

        let outcome = engine.fast_search("sunsett", 1).await.expect("search");

        assert_eq!(outcome.corrected_query.as_deref(), Some("sunset"));
        assert_eq!(outcome.results.len(), 1);

        let deep = engine.deep_search("sunsett", 1).await.expect("deep search");
        assert!(deep.corrected_query.is_none());
        assert!(deep.did_you_mean.is_none());
    }

    #[test]
    fn invalid_tuning_is_rejected_at_construction() {
        let corpus = Arc::new(InMemoryCorpus::from_records(Vec::new()).expect("corpus"));
        let services =
            SearchServices::from_corpus(Arc::new(CountingEncoder::default()), corpus, None);
        let tuning = SearchTuning {
            temperature: -1.0,
            ..SearchTuning::default()
        };

        let result = SearchEngine::with_builtin_lexicon(services, tuning);

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn spell_check_and_suggestions() {
        let engine = engine(Arc::new(CountingEncoder::default()));

        assert!(engine.spell_check(" ").is_err());
        let correction = engine.spell_check("sunsett").expect("correction");
        assert!(correction.was_corrected);

        let suggestions = engine.suggestions("sun", DEFAULT_SUGGESTIONS);
        assert_eq!(suggestions, vec!["sunset", "sunrise"]);
    }
}
