mod config;
mod diagnostics;
mod services;
mod stages;
mod strategies;

#[cfg(test)]
mod tests;

pub use config::{SearchConfig, SearchMode, SearchTuning};
pub use diagnostics::{
    CalibrationStats, PipelineDiagnostics, RecallStats, RelaxationStats, ValidationStats,
};
pub use services::{QueryLexicon, SearchServices};

use async_trait::async_trait;
use common::error::AppError;
use std::time::{Duration, Instant};
use tracing::info;

use crate::{scoring::ScoredCandidate, spelling::SpellCorrection};
use stages::PipelineContext;
use strategies::{DeepSearchDriver, FastSearchDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Correct,
    Expand,
    Embed,
    Recall,
    Aggregate,
    LocalRerank,
    Calibrate,
    MetadataMatch,
    Fuse,
    Validate,
    Diversify,
    Assemble,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

pub trait StrategyDriver: Send + Sync {
    type Output;

    fn stages(&self) -> Vec<BoxedStage>;
    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError>;
}

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn stage_ms(&self, kind: StageKind) -> Option<u128> {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.timings.iter().map(|(kind, _)| *kind)
    }
}

/// What a search run hands back before the public response is shaped.
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub correction: Option<SpellCorrection>,
    pub expanded_terms: Vec<String>,
    pub results: Vec<ScoredCandidate>,
}

pub struct PipelineRunOutput<T> {
    pub results: T,
    pub diagnostics: Option<PipelineDiagnostics>,
    pub stage_timings: PipelineStageTimings,
}

pub async fn run_pipeline(
    services: &SearchServices,
    lexicon: &QueryLexicon,
    query: &str,
    top_k: usize,
    config: &SearchConfig,
    capture_diagnostics: bool,
) -> Result<PipelineRunOutput<SearchHits>, AppError> {
    let query_chars = query.chars().count();
    let preview: String = query.chars().take(120).collect();
    info!(
        query_chars,
        preview_truncated = query_chars > preview.chars().count(),
        preview = %preview,
        mode = %config.mode,
        top_k,
        "Starting search pipeline"
    );

    let ctx = PipelineContext::new(services, lexicon, query.to_owned(), top_k, config);
    let run = match config.mode {
        SearchMode::Fast => run_with_driver(FastSearchDriver::new(), ctx, capture_diagnostics).await?,
        SearchMode::Deep => run_with_driver(DeepSearchDriver::new(), ctx, capture_diagnostics).await?,
    };

    info!(
        mode = %config.mode,
        results = run.results.results.len(),
        elapsed_ms = run.stage_timings.total().as_millis(),
        embed_ms = ?run.stage_timings.stage_ms(StageKind::Embed),
        recall_ms = ?run.stage_timings.stage_ms(StageKind::Recall),
        validate_ms = ?run.stage_timings.stage_ms(StageKind::Validate),
        "Search pipeline finished"
    );
    Ok(run)
}

async fn run_with_driver<D: StrategyDriver>(
    driver: D,
    mut ctx: PipelineContext<'_>,
    capture_diagnostics: bool,
) -> Result<PipelineRunOutput<D::Output>, AppError> {
    if capture_diagnostics {
        ctx.enable_diagnostics();
    }

    for stage in driver.stages() {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        ctx.record_stage_duration(stage.kind(), start.elapsed());
    }

    let diagnostics = ctx.take_diagnostics();
    let stage_timings = ctx.take_stage_timings();
    let results = driver.finalize(&mut ctx)?;

    Ok(PipelineRunOutput {
        results,
        diagnostics,
        stage_timings,
    })
}
