use super::{
    stages::{
        AggregateStage, AssembleStage, CalibrateStage, CorrectStage, DiversifyStage, EmbedStage,
        ExpandStage, FuseStage, LocalRerankStage, MetadataMatchStage, PipelineContext,
        RecallStage, ValidateStage,
    },
    BoxedStage, SearchHits, StrategyDriver,
};
use common::error::AppError;

/// Embedding-only ranking: calibrated similarity is the final score.
pub struct FastSearchDriver;

impl FastSearchDriver {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyDriver for FastSearchDriver {
    type Output = SearchHits;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(CorrectStage),
            Box::new(ExpandStage),
            Box::new(EmbedStage),
            Box::new(RecallStage),
            Box::new(AggregateStage),
            Box::new(LocalRerankStage),
            Box::new(CalibrateStage),
            Box::new(DiversifyStage),
            Box::new(AssembleStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(ctx.take_hits())
    }
}

pub struct DeepSearchDriver;

impl DeepSearchDriver {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyDriver for DeepSearchDriver {
    type Output = SearchHits;

    fn stages(&self) -> Vec<BoxedStage> {
        // Deep search embeds the query exactly as typed; no spell correction.
        vec![
            Box::new(ExpandStage),
            Box::new(EmbedStage),
            Box::new(RecallStage),
            Box::new(AggregateStage),
            Box::new(LocalRerankStage),
            Box::new(CalibrateStage),
            Box::new(MetadataMatchStage),
            Box::new(FuseStage),
            // Validator sees fused scores; it must run before diversity trims the list.
            Box::new(ValidateStage),
            Box::new(DiversifyStage),
            Box::new(AssembleStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(ctx.take_hits())
    }
}
