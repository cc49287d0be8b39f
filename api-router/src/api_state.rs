use std::sync::Arc;

use common::utils::config::AppConfig;
use retrieval_pipeline::SearchEngine;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SearchEngine>,
    pub config: AppConfig,
    /// Number of images served; readiness fails while this is zero.
    pub corpus_images: usize,
}

impl ApiState {
    pub fn new(config: &AppConfig, engine: SearchEngine, corpus_images: usize) -> Self {
        Self {
            engine: Arc::new(engine),
            config: config.clone(),
            corpus_images,
        }
    }
}
