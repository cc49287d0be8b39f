use super::*;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        index::{EmbeddingStore, MetadataStore, VectorHit, VectorIndex},
        types::image_record::{ImageEmbeddings, ImageMetadata},
    },
    utils::embedding::TextEncoder,
};

use crate::{
    spelling::SpellingThresholds,
    validation::{SecondaryValidator, ValidatorPolicy, ValidatorVerdict},
};

const DIM: usize = 16;

/// Terms the mock encoder knows; each maps to its own one-hot axis.
const VOCAB: &[&str] = &[
    "dog", "puppy", "canine", "pet", "animal", "pup", "cat", "kitten", "feline", "sunset", "dusk",
    "evening", "sunrise", "dawn", "golden hour",
];

fn axis_of(term: &str) -> usize {
    VOCAB
        .iter()
        .position(|known| *known == term)
        .unwrap_or(DIM - 1)
}

fn one_hot(axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    vector[axis] = 1.0;
    vector
}

#[derive(Default)]
struct AxisEncoder {
    failing: HashSet<String>,
}

impl AxisEncoder {
    fn failing(terms: &[&str]) -> Self {
        Self {
            failing: terms.iter().map(|term| (*term).to_owned()).collect(),
        }
    }
}

#[async_trait]
impl TextEncoder for AxisEncoder {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>, AppError> {
        if self.failing.contains(text) {
            return Err(AppError::EncoderUnavailable(format!("cannot encode {text}")));
        }
        Ok(one_hot(axis_of(text)))
    }
}

/// Returns scripted hits for whichever term axis the query embedding points at.
#[derive(Default)]
struct ScriptedIndex {
    hits: HashMap<usize, Vec<VectorHit>>,
    slow: HashSet<usize>,
}

impl ScriptedIndex {
    fn with_hits(mut self, term: &str, hits: &[(&str, f32)]) -> Self {
        self.hits.insert(
            axis_of(term),
            hits.iter()
                .map(|(id, score)| VectorHit::new(*id, *score))
                .collect(),
        );
        self
    }

    fn slow_for(mut self, term: &str) -> Self {
        self.slow.insert(axis_of(term));
        self
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>, AppError> {
        let axis = embedding
            .iter()
            .position(|value| *value > 0.5)
            .unwrap_or(DIM - 1);
        if self.slow.contains(&axis) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        let mut hits = self.hits.get(&axis).cloned().unwrap_or_default();
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[derive(Default)]
struct MapStore {
    embeddings: HashMap<String, ImageEmbeddings>,
    metadata: HashMap<String, ImageMetadata>,
}

impl MapStore {
    fn with_global(mut self, id: &str, global: Vec<f32>) -> Self {
        self.embeddings.insert(
            id.to_owned(),
            ImageEmbeddings {
                global,
                locals: Vec::new(),
            },
        );
        self
    }

    fn with_metadata(mut self, id: &str, metadata: ImageMetadata) -> Self {
        self.metadata.insert(id.to_owned(), metadata);
        self
    }
}

#[async_trait]
impl EmbeddingStore for MapStore {
    async fn get_embeddings(&self, id: &str) -> Result<Option<ImageEmbeddings>, AppError> {
        Ok(self.embeddings.get(id).cloned())
    }
}

#[async_trait]
impl MetadataStore for MapStore {
    async fn get_metadata(&self, id: &str) -> Result<Option<ImageMetadata>, AppError> {
        Ok(self.metadata.get(id).cloned())
    }
}

fn services(
    encoder: AxisEncoder,
    index: ScriptedIndex,
    store: MapStore,
    validator: Option<SecondaryValidator>,
) -> SearchServices {
    let store = Arc::new(store);
    SearchServices {
        encoder: Arc::new(encoder),
        index: Arc::new(index),
        embeddings: Arc::clone(&store) as Arc<dyn EmbeddingStore>,
        metadata: store as Arc<dyn MetadataStore>,
        validator,
    }
}

fn lexicon() -> QueryLexicon {
    QueryLexicon::builtin(SpellingThresholds::default())
}

fn caption(text: &str) -> ImageMetadata {
    ImageMetadata {
        caption: Some(text.to_owned()),
        ..ImageMetadata::default()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

async fn search(
    services: &SearchServices,
    query: &str,
    top_k: usize,
    config: &SearchConfig,
) -> SearchHits {
    run_pipeline(services, &lexicon(), query, top_k, config, false)
        .await
        .expect("pipeline run")
        .results
}

#[tokio::test]
async fn fast_search_keeps_best_expansion_per_candidate() {
    let index = ScriptedIndex::default()
        .with_hits("dog", &[("C1", 0.12)])
        .with_hits("puppy", &[("C1", 0.18)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let hits = search(&services, "dog", 10, &SearchConfig::fast()).await;

    assert_eq!(
        hits.expanded_terms,
        vec!["dog", "puppy", "canine", "pet", "animal", "pup"]
    );
    assert_eq!(hits.results.len(), 1);
    let top = &hits.results[0];
    assert_eq!(top.id, "C1");
    assert_eq!(top.matched_term, "puppy");
    assert!((top.raw_similarity - 0.18).abs() < 1e-6);
    assert!((top.calibrated_score - sigmoid(0.18 * 25.0)).abs() < 1e-4);
    assert!((top.combined_score - top.calibrated_score).abs() < f32::EPSILON);
    assert!(top.metadata_score.is_none());
}

#[tokio::test]
async fn fast_search_orders_and_truncates_results() {
    let index = ScriptedIndex::default()
        .with_hits("dog", &[("A", 0.05), ("B", 0.20), ("C", -0.10)])
        .with_hits("pet", &[("D", 0.15), ("A", 0.01)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let hits = search(&services, "dog", 3, &SearchConfig::fast()).await;
    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();

    assert_eq!(ids, vec!["B", "D", "A"]);
    assert!(hits
        .results
        .windows(2)
        .all(|pair| pair[0].combined_score >= pair[1].combined_score));
    assert!(hits
        .results
        .iter()
        .all(|c| (0.0..=1.0).contains(&c.combined_score)));
}

#[tokio::test]
async fn min_raw_similarity_drops_weak_hits() {
    let index = ScriptedIndex::default().with_hits("dog", &[("A", 0.05), ("B", 0.20)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);
    let mut config = SearchConfig::fast();
    config.tuning.min_raw_similarity = Some(0.1);

    let hits = search(&services, "dog", 10, &config).await;

    assert_eq!(hits.results.len(), 1);
    assert_eq!(hits.results[0].id, "B");
}

#[tokio::test]
async fn partial_encoder_failure_is_skipped() {
    let index = ScriptedIndex::default()
        .with_hits("dog", &[("A", 0.30)])
        .with_hits("puppy", &[("B", 0.10)]);
    let services = services(
        AxisEncoder::failing(&["dog"]),
        index,
        MapStore::default(),
        None,
    );

    let hits = search(&services, "dog", 10, &SearchConfig::fast()).await;

    assert_eq!(hits.results.len(), 1);
    assert_eq!(hits.results[0].id, "B");
}

#[tokio::test]
async fn encoder_failing_every_term_fails_the_request() {
    let failing = AxisEncoder::failing(&["dog", "puppy", "canine", "pet", "animal", "pup"]);
    let services = services(failing, ScriptedIndex::default(), MapStore::default(), None);

    let result = run_pipeline(&services, &lexicon(), "dog", 5, &SearchConfig::fast(), false).await;

    assert!(matches!(result, Err(AppError::EncoderUnavailable(_))));
}

#[tokio::test]
async fn slow_term_recall_is_dropped() {
    let index = ScriptedIndex::default()
        .with_hits("dog", &[("A", 0.30)])
        .with_hits("puppy", &[("B", 0.10)])
        .slow_for("dog");
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);
    let mut config = SearchConfig::fast();
    config.tuning.index_timeout_ms = 50;

    let hits = search(&services, "dog", 10, &config).await;

    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["B"]);
}

#[tokio::test]
async fn misspelled_query_is_corrected_before_recall() {
    let index = ScriptedIndex::default().with_hits("sunset", &[("S1", 0.2)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let hits = search(&services, "sunsett", 5, &SearchConfig::fast()).await;

    let correction = hits.correction.expect("correction recorded");
    assert!(correction.was_corrected);
    assert_eq!(correction.corrected, "sunset");
    assert_eq!(hits.expanded_terms.first().map(String::as_str), Some("sunset"));
    assert_eq!(hits.results[0].matched_term, "sunset");
}

#[tokio::test]
async fn deep_search_uses_the_query_as_typed() {
    let index = ScriptedIndex::default()
        .with_hits("sunsett", &[("TYPED", 0.2)])
        .with_hits("sunset", &[("CORRECTED", 0.3)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let hits = search(&services, "  sunsett ", 5, &SearchConfig::deep()).await;

    assert!(hits.correction.is_none());
    assert_eq!(hits.expanded_terms.first().map(String::as_str), Some("sunsett"));
    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["TYPED"]);
}

#[tokio::test]
async fn non_finite_similarities_are_dropped_without_failing_the_request() {
    let scripted: Vec<(String, f32)> = (0..200u16)
        .map(|i| {
            let score = if i % 7 == 0 {
                f32::NAN
            } else {
                0.3 - f32::from(i) * 0.001
            };
            (format!("I{i}"), score)
        })
        .collect();
    let borrowed: Vec<(&str, f32)> = scripted
        .iter()
        .map(|(id, score)| (id.as_str(), *score))
        .collect();
    let index = ScriptedIndex::default().with_hits("dog", &borrowed);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);
    let mut config = SearchConfig::fast();
    config.tuning.fast_recall_per_term = 200;

    let hits = search(&services, "dog", 50, &config).await;

    assert_eq!(hits.results.len(), 50);
    assert!(hits
        .results
        .iter()
        .all(|c| c.combined_score.is_finite() && (0.0..=1.0).contains(&c.combined_score)));
    assert!(hits
        .results
        .windows(2)
        .all(|pair| pair[0].combined_score >= pair[1].combined_score));
    assert_eq!(hits.results[0].id, "I1");
    assert!(hits.results.iter().all(|c| c.id != "I0" && c.id != "I7"));
}

#[tokio::test]
async fn non_finite_hit_is_dropped_and_the_rest_are_ranked() {
    let index = ScriptedIndex::default().with_hits(
        "dog",
        &[("BROKEN", f32::NAN), ("GOOD", 0.2), ("INF", f32::INFINITY), ("OK", 0.1)],
    );
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let hits = search(&services, "dog", 5, &SearchConfig::deep()).await;

    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["GOOD", "OK"]);
}

#[tokio::test]
async fn empty_recall_yields_empty_results() {
    let services = services(
        AxisEncoder::default(),
        ScriptedIndex::default(),
        MapStore::default(),
        None,
    );

    let hits = search(&services, "dog", 5, &SearchConfig::deep()).await;

    assert!(hits.results.is_empty());
}

#[tokio::test]
async fn diversity_drops_near_duplicates() {
    let index = ScriptedIndex::default().with_hits("dog", &[("C1", 0.30), ("C2", 0.29), ("C3", 0.10)]);
    let store = MapStore::default()
        .with_global("C1", vec![1.0, 0.0, 0.0])
        .with_global("C2", vec![0.96, 0.28, 0.0])
        .with_global("C3", vec![0.0, 0.0, 1.0]);
    let services = services(AxisEncoder::default(), index, store, None);

    let hits = search(&services, "dog", 10, &SearchConfig::fast()).await;

    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["C1", "C3"]);
}

#[tokio::test]
async fn deep_search_promotes_metadata_matches() {
    let index = ScriptedIndex::default().with_hits("dog", &[("PLAIN", 0.12), ("CAPTIONED", 0.10)]);
    let store = MapStore::default().with_metadata("CAPTIONED", caption("A dog running on the beach"));
    let services = services(AxisEncoder::default(), index, store, None);

    let fast = search(&services, "dog", 5, &SearchConfig::fast()).await;
    assert_eq!(fast.results[0].id, "PLAIN");

    let deep = search(&services, "dog", 5, &SearchConfig::deep()).await;
    assert_eq!(deep.results[0].id, "CAPTIONED");

    let captioned = &deep.results[0];
    let expected = 0.6 * sigmoid(0.10 * 25.0) + 0.4 * 1.0;
    assert!((captioned.combined_score - expected).abs() < 1e-4);
    assert_eq!(captioned.metadata_score, Some(1.0));

    let plain = &deep.results[1];
    assert_eq!(plain.metadata_score, Some(0.0));
    assert!((plain.combined_score - 0.6 * sigmoid(0.12 * 25.0)).abs() < 1e-4);
}

#[tokio::test]
async fn deep_search_relaxes_to_expansion_terms() {
    let index = ScriptedIndex::default().with_hits("dog", &[("TAGGED", 0.10)]);
    let store = MapStore::default().with_metadata(
        "TAGGED",
        ImageMetadata {
            tags: vec!["puppy".to_owned()],
            ..ImageMetadata::default()
        },
    );
    let services = services(AxisEncoder::default(), index, store, None);

    let run = run_pipeline(&services, &lexicon(), "dog", 5, &SearchConfig::deep(), true)
        .await
        .expect("pipeline run");

    let tagged = &run.results.results[0];
    let relaxed = 0.8 * 0.85;
    assert!((tagged.metadata_score.unwrap_or_default() - relaxed).abs() < 1e-4);

    let relaxation = run
        .diagnostics
        .and_then(|diag| diag.relaxation)
        .expect("relaxation stats");
    assert!(relaxation.applied);
    assert_eq!(relaxation.improved, 1);
}

#[tokio::test]
async fn validator_gate_drops_rejected_candidates() {
    let index = ScriptedIndex::default().with_hits("dog", &[("KEEP", 0.20), ("DROP", 0.25)]);
    let validator = SecondaryValidator::fixed(HashMap::from([
        ("KEEP".to_owned(), ValidatorVerdict::Accept),
        ("DROP".to_owned(), ValidatorVerdict::Reject),
    ]));
    let services = services(AxisEncoder::default(), index, MapStore::default(), Some(validator));
    let mut config = SearchConfig::deep();
    config.tuning.validator_policy = ValidatorPolicy::Gate {
        min_confidence: 0.5,
    };

    let hits = search(&services, "dog", 5, &config).await;

    let ids: Vec<&str> = hits.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["KEEP"]);
    assert_eq!(hits.results[0].validator_score, Some(1.0));
}

#[tokio::test]
async fn validator_blend_adjusts_and_missing_verdict_degrades() {
    let index = ScriptedIndex::default().with_hits("dog", &[("SCORED", 0.20), ("UNKNOWN", 0.10)]);
    let validator = SecondaryValidator::fixed(HashMap::from([(
        "SCORED".to_owned(),
        ValidatorVerdict::Score { confidence: 0.0 },
    )]));
    let services = services(AxisEncoder::default(), index, MapStore::default(), Some(validator));

    let hits = search(&services, "dog", 5, &SearchConfig::deep()).await;

    let scored = hits
        .results
        .iter()
        .find(|c| c.id == "SCORED")
        .expect("scored candidate");
    let hybrid = 0.6 * sigmoid(0.20 * 25.0);
    assert!((scored.combined_score - hybrid * 0.7).abs() < 1e-4);

    let unknown = hits
        .results
        .iter()
        .find(|c| c.id == "UNKNOWN")
        .expect("unvalidated candidate kept");
    assert!(unknown.validator_score.is_none());
    assert!((unknown.combined_score - 0.6 * sigmoid(0.10 * 25.0)).abs() < 1e-4);
}

#[tokio::test]
async fn stage_timings_follow_strategy_order() {
    let index = ScriptedIndex::default().with_hits("dog", &[("C1", 0.2)]);
    let services = services(AxisEncoder::default(), index, MapStore::default(), None);

    let fast = run_pipeline(&services, &lexicon(), "dog", 5, &SearchConfig::fast(), false)
        .await
        .expect("fast run");
    let fast_stages: Vec<StageKind> = fast.stage_timings.stages().collect();
    assert_eq!(fast_stages.first(), Some(&StageKind::Correct));
    assert_eq!(fast_stages.last(), Some(&StageKind::Assemble));
    assert!(!fast_stages.contains(&StageKind::Fuse));
    assert!(fast.diagnostics.is_none());

    let deep = run_pipeline(&services, &lexicon(), "dog", 5, &SearchConfig::deep(), true)
        .await
        .expect("deep run");
    let deep_stages: Vec<StageKind> = deep.stage_timings.stages().collect();
    assert_eq!(deep_stages.first(), Some(&StageKind::Expand));
    assert!(!deep_stages.contains(&StageKind::Correct));
    assert!(deep.stage_timings.stage_ms(StageKind::Correct).is_none());
    assert!(deep.stage_timings.stage_ms(StageKind::Validate).is_some());
    assert!(fast.stage_timings.stage_ms(StageKind::Validate).is_none());
    let fuse = deep_stages.iter().position(|k| *k == StageKind::Fuse);
    let diversify = deep_stages.iter().position(|k| *k == StageKind::Diversify);
    assert!(fuse < diversify);

    let diagnostics = deep.diagnostics.expect("diagnostics captured");
    assert_eq!(diagnostics.expanded_terms.len(), 6);
    let recall = diagnostics.recall.expect("recall stats");
    assert_eq!(recall.unique_candidates, 1);
}
