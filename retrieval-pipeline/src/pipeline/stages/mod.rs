use async_trait::async_trait;
use common::{error::AppError, storage::types::image_record::ImageMetadata};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::{
    aggregate::{merge_term_hits, TermHits},
    calibration::calibrate,
    diversity::diversify,
    expansion::TermGroup,
    metadata::{match_score, MetadataMatchOptions},
    recall::{encode_terms, recall_terms},
    reranking::rerank_window,
    scoring::{fuse_scores, sort_by_combined_desc, ScoredCandidate},
    spelling::SpellCorrection,
};

use super::{
    config::SearchConfig,
    diagnostics::{
        CalibrationStats, PipelineDiagnostics, RecallStats, RelaxationStats, ValidationStats,
    },
    services::{QueryLexicon, SearchServices},
    PipelineStage, PipelineStageTimings, SearchHits, StageKind,
};

/// Number of top scores sampled into diagnostics.
const SCORE_SAMPLE: usize = 5;

pub struct PipelineContext<'a> {
    pub services: &'a SearchServices,
    pub lexicon: &'a QueryLexicon,
    pub config: &'a SearchConfig,
    pub raw_query: String,
    pub top_k: usize,
    /// Query after spell correction; equals the trimmed raw query when nothing changed.
    pub query_text: String,
    pub correction: Option<SpellCorrection>,
    pub terms: Vec<String>,
    pub term_groups: Vec<TermGroup>,
    pub term_embeddings: HashMap<String, Vec<f32>>,
    pub term_hits: Vec<TermHits>,
    pub candidates: Vec<ScoredCandidate>,
    pub candidate_metadata: HashMap<String, Option<ImageMetadata>>,
    pub results: Vec<ScoredCandidate>,
    pub diagnostics: Option<PipelineDiagnostics>,
    stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        services: &'a SearchServices,
        lexicon: &'a QueryLexicon,
        raw_query: String,
        top_k: usize,
        config: &'a SearchConfig,
    ) -> Self {
        let query_text = raw_query.trim().to_owned();
        Self {
            services,
            lexicon,
            config,
            raw_query,
            top_k,
            query_text,
            correction: None,
            terms: Vec::new(),
            term_groups: Vec::new(),
            term_embeddings: HashMap::new(),
            term_hits: Vec::new(),
            candidates: Vec::new(),
            candidate_metadata: HashMap::new(),
            results: Vec::new(),
            diagnostics: None,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn enable_diagnostics(&mut self) {
        if self.diagnostics.is_none() {
            self.diagnostics = Some(PipelineDiagnostics::default());
        }
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics.is_some()
    }

    fn diagnostics_mut(&mut self) -> Option<&mut PipelineDiagnostics> {
        self.diagnostics.as_mut()
    }

    pub fn take_diagnostics(&mut self) -> Option<PipelineDiagnostics> {
        self.diagnostics.take()
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.stage_timings.record(kind, duration);
    }

    pub fn take_hits(&mut self) -> SearchHits {
        SearchHits {
            correction: self.correction.take(),
            expanded_terms: std::mem::take(&mut self.terms),
            results: std::mem::take(&mut self.results),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrectStage;

#[async_trait]
impl PipelineStage for CorrectStage {
    fn kind(&self) -> StageKind {
        StageKind::Correct
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        correct(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpandStage;

#[async_trait]
impl PipelineStage for ExpandStage {
    fn kind(&self) -> StageKind {
        StageKind::Expand
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        expand(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        embed(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecallStage;

#[async_trait]
impl PipelineStage for RecallStage {
    fn kind(&self) -> StageKind {
        StageKind::Recall
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        recall(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateStage;

#[async_trait]
impl PipelineStage for AggregateStage {
    fn kind(&self) -> StageKind {
        StageKind::Aggregate
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        aggregate(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalRerankStage;

#[async_trait]
impl PipelineStage for LocalRerankStage {
    fn kind(&self) -> StageKind {
        StageKind::LocalRerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        local_rerank(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrateStage;

#[async_trait]
impl PipelineStage for CalibrateStage {
    fn kind(&self) -> StageKind {
        StageKind::Calibrate
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        calibrate_scores(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetadataMatchStage;

#[async_trait]
impl PipelineStage for MetadataMatchStage {
    fn kind(&self) -> StageKind {
        StageKind::MetadataMatch
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        match_metadata(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FuseStage;

#[async_trait]
impl PipelineStage for FuseStage {
    fn kind(&self) -> StageKind {
        StageKind::Fuse
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        fuse(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidateStage;

#[async_trait]
impl PipelineStage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        validate(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiversifyStage;

#[async_trait]
impl PipelineStage for DiversifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Diversify
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        diversify_results(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleStage;

#[async_trait]
impl PipelineStage for AssembleStage {
    fn kind(&self) -> StageKind {
        StageKind::Assemble
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        assemble(ctx).await
    }
}

#[instrument(level = "trace", skip_all)]
pub async fn correct(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let correction = ctx.lexicon.speller.correct(&ctx.query_text);
    if correction.was_corrected {
        debug!(
            original = %correction.original,
            corrected = %correction.corrected,
            "Using spell-corrected query"
        );
        ctx.query_text.clone_from(&correction.corrected);
    }
    if let Some(diag) = ctx.diagnostics_mut() {
        diag.correction = Some(correction.clone());
    }
    ctx.correction = Some(correction);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn expand(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let cap = ctx.config.tuning.expansion_cap;
    ctx.terms = ctx.lexicon.expansion.expand(&ctx.query_text, cap);
    ctx.term_groups = ctx.lexicon.expansion.groups(&ctx.query_text);
    if ctx.terms.is_empty() {
        return Err(AppError::InvalidQuery(
            "query has no searchable terms".to_string(),
        ));
    }

    debug!(terms = ?ctx.terms, "Expanded query");
    let terms = ctx.terms.clone();
    if let Some(diag) = ctx.diagnostics_mut() {
        diag.expanded_terms = terms;
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn embed(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = &ctx.config.tuning;
    ctx.term_embeddings = encode_terms(
        &ctx.terms,
        ctx.services.encoder.as_ref(),
        tuning.encoder_timeout(),
        tuning.concurrency,
    )
    .await?;
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn recall(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = &ctx.config.tuning;
    let top_n = ctx.config.recall_per_term(ctx.top_k);
    ctx.term_hits = recall_terms(
        &ctx.terms,
        &ctx.term_embeddings,
        ctx.services.index.as_ref(),
        top_n,
        tuning.index_timeout(),
        tuning.concurrency,
    )
    .await?;
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn aggregate(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let term_hits = std::mem::take(&mut ctx.term_hits);
    let terms_recalled = term_hits.len();
    let total_hits = term_hits.iter().map(|t| t.hits.len()).sum();

    ctx.candidates = merge_term_hits(term_hits, ctx.config.tuning.min_raw_similarity);
    debug!(
        terms_recalled,
        total_hits,
        unique_candidates = ctx.candidates.len(),
        "Aggregated per-term recall"
    );

    if ctx.diagnostics_enabled() {
        let stats = RecallStats {
            terms_requested: ctx.terms.len(),
            terms_encoded: ctx.term_embeddings.len(),
            terms_recalled,
            total_hits,
            unique_candidates: ctx.candidates.len(),
        };
        if let Some(diag) = ctx.diagnostics_mut() {
            diag.recall = Some(stats);
        }
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn local_rerank(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = &ctx.config.tuning;
    let window = tuning.local_rerank_window.min(ctx.candidates.len());
    rerank_window(
        &mut ctx.candidates,
        window,
        &ctx.term_embeddings,
        ctx.services.embeddings.as_ref(),
        tuning.local_weights,
        tuning.concurrency,
    )
    .await;

    if let Some(diag) = ctx.diagnostics_mut() {
        diag.reranked_window = Some(window);
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn calibrate_scores(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let temperature = ctx.config.tuning.temperature;
    let before = ctx.candidates.len();

    ctx.candidates.retain_mut(|candidate| {
        match calibrate(candidate.final_raw_similarity, temperature) {
            Ok(score) => {
                candidate.calibrated_score = score;
                candidate.combined_score = score;
                true
            }
            Err(err) => {
                warn!(candidate_id = %candidate.id, error = %err, "Dropping candidate with invalid similarity");
                false
            }
        }
    });
    sort_by_combined_desc(&mut ctx.candidates);

    if ctx.diagnostics_enabled() {
        let stats = CalibrationStats {
            kept: ctx.candidates.len(),
            dropped: before.saturating_sub(ctx.candidates.len()),
            top_scores: sample_scores(&ctx.candidates),
        };
        if let Some(diag) = ctx.diagnostics_mut() {
            diag.calibration = Some(stats);
        }
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn match_metadata(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let store = ctx.services.metadata.as_ref();
    let lookups: Vec<_> = ctx
        .candidates
        .iter()
        .map(|candidate| {
            let id = candidate.id.clone();
            async move {
                let metadata = match store.get_metadata(&id).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(candidate_id = %id, error = %err, "Metadata lookup failed; scoring as empty");
                        None
                    }
                };
                (id, metadata)
            }
        })
        .collect();
    ctx.candidate_metadata = stream::iter(lookups)
        .buffer_unordered(ctx.config.tuning.concurrency.max(1))
        .collect()
        .await;

    let options = ctx.config.tuning.metadata.strict();
    for candidate in &mut ctx.candidates {
        let metadata = ctx
            .candidate_metadata
            .get(&candidate.id)
            .and_then(Option::as_ref);
        candidate.metadata_score = Some(match_score(&ctx.term_groups, metadata, &options));
    }

    debug!(
        candidates = ctx.candidates.len(),
        with_metadata = ctx.candidate_metadata.values().filter(|m| m.is_some()).count(),
        "Matched candidate metadata"
    );
    Ok(())
}

/// Fuses calibrated and metadata scores, relaxing metadata matching to expansion terms
/// when too few candidates clear the good-result threshold.
#[instrument(level = "trace", skip_all)]
pub async fn fuse(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = &ctx.config.tuning;
    let weights = tuning.fusion_weights;
    let threshold = tuning.relaxation_threshold;

    for candidate in &mut ctx.candidates {
        let metadata = candidate.metadata_score.unwrap_or(0.0);
        candidate.combined_score = fuse_scores(candidate.calibrated_score, metadata, weights);
    }

    let count_good = |candidates: &[ScoredCandidate]| {
        candidates
            .iter()
            .filter(|candidate| candidate.combined_score > threshold)
            .count()
    };
    let good_before = count_good(&ctx.candidates);
    let mut stats = RelaxationStats {
        good_before,
        good_after: good_before,
        ..RelaxationStats::default()
    };

    if good_before < ctx.top_k && tuning.metadata.allow_expansions {
        let relaxed = MetadataMatchOptions {
            allow_expansions: true,
            ..tuning.metadata
        };
        stats.applied = true;
        for candidate in &mut ctx.candidates {
            let metadata = ctx
                .candidate_metadata
                .get(&candidate.id)
                .and_then(Option::as_ref);
            let score = match_score(&ctx.term_groups, metadata, &relaxed);
            if score > candidate.metadata_score.unwrap_or(0.0) {
                candidate.metadata_score = Some(score);
                candidate.combined_score = fuse_scores(candidate.calibrated_score, score, weights);
                stats.improved = stats.improved.saturating_add(1);
            }
        }
        stats.good_after = count_good(&ctx.candidates);
        debug!(
            good_before,
            good_after = stats.good_after,
            improved = stats.improved,
            "Relaxed metadata matching"
        );
    }

    sort_by_combined_desc(&mut ctx.candidates);
    if let Some(diag) = ctx.diagnostics_mut() {
        diag.relaxation = Some(stats);
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn validate(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let Some(validator) = ctx.services.validator.as_ref() else {
        debug!("No secondary validator configured; keeping hybrid scores");
        return Ok(());
    };
    let tuning = &ctx.config.tuning;
    let policy = tuning.validator_policy;
    let timeout = tuning.validator_timeout();
    let query = ctx.query_text.as_str();
    let window = tuning.validator_top_k.min(ctx.candidates.len());

    let calls: Vec<_> = ctx
        .candidates
        .iter()
        .take(window)
        .enumerate()
        .map(|(slot, candidate)| {
            let id = candidate.id.clone();
            async move {
                let verdict = match tokio::time::timeout(timeout, validator.validate(&id, query)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::ValidatorUnavailable(format!(
                        "validation timed out after {}ms",
                        timeout.as_millis()
                    ))),
                };
                (slot, id, verdict)
            }
        })
        .collect();
    let verdicts: Vec<_> = stream::iter(calls)
        .buffer_unordered(tuning.concurrency.max(1))
        .collect()
        .await;

    let mut stats = ValidationStats {
        sent: window,
        ..ValidationStats::default()
    };
    let mut dropped_slots = Vec::new();
    for (slot, id, verdict) in verdicts {
        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(candidate_id = %id, error = %err, "Validator unavailable; keeping hybrid score");
                stats.unavailable = stats.unavailable.saturating_add(1);
                continue;
            }
        };
        let Some(candidate) = ctx.candidates.get_mut(slot) else {
            continue;
        };
        candidate.validator_score = Some(verdict.confidence());
        match policy.apply(candidate.combined_score, &verdict) {
            Some(score) => {
                candidate.combined_score = score;
                stats.adjusted = stats.adjusted.saturating_add(1);
            }
            None => {
                debug!(candidate_id = %id, "Validator rejected candidate");
                dropped_slots.push(slot);
            }
        }
    }

    stats.dropped = dropped_slots.len();
    if !dropped_slots.is_empty() {
        let mut slot = 0usize;
        ctx.candidates.retain(|_| {
            let keep = !dropped_slots.contains(&slot);
            slot = slot.saturating_add(1);
            keep
        });
    }
    sort_by_combined_desc(&mut ctx.candidates);

    if let Some(diag) = ctx.diagnostics_mut() {
        diag.validation = Some(stats);
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn diversify_results(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = &ctx.config.tuning;
    let candidates = std::mem::take(&mut ctx.candidates);
    let (kept, stats) = diversify(
        candidates,
        ctx.services.embeddings.as_ref(),
        tuning.diversity_threshold,
        ctx.top_k,
        tuning.concurrency,
    )
    .await;

    debug!(
        kept = stats.kept,
        dropped = stats.dropped,
        unchecked = stats.unchecked,
        "Applied diversity filter"
    );
    ctx.results = kept;
    if let Some(diag) = ctx.diagnostics_mut() {
        diag.diversity = Some(stats);
    }
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn assemble(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if ctx.results.is_empty() && !ctx.candidates.is_empty() {
        ctx.results = std::mem::take(&mut ctx.candidates);
    }
    sort_by_combined_desc(&mut ctx.results);
    ctx.results.truncate(ctx.top_k);
    debug!(returned = ctx.results.len(), "Assembled ranked results");
    Ok(())
}

fn sample_scores(candidates: &[ScoredCandidate]) -> Vec<f32> {
    candidates
        .iter()
        .take(SCORE_SAMPLE)
        .map(|candidate| candidate.combined_score)
        .collect()
}
