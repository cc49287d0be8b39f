use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::corpus::InMemoryCorpus,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use retrieval_pipeline::{
    validation::SecondaryValidator, SearchEngine, SearchServices, SearchTuning,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let app = build_app(&config).await?;

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_app(config: &AppConfig) -> Result<Router, Box<dyn std::error::Error>> {
    let corpus = Arc::new(InMemoryCorpus::load(&config.corpus_path).await?);

    // Create embedding provider based on config
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(config).await?);
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        corpus_dimension = corpus.dimension(),
        "Embedding provider initialized"
    );
    if !corpus.is_empty() && corpus.dimension() != embedding_provider.dimension() {
        return Err(format!(
            "corpus embeddings have dimension {} but the encoder produces {}",
            corpus.dimension(),
            embedding_provider.dimension()
        )
        .into());
    }

    let validator = SecondaryValidator::maybe_from_config(config)?;
    if let Some(validator) = &validator {
        info!(backend = validator.backend_label(), "Secondary validator enabled");
    }

    let tuning = search_tuning(config)?;
    let images = corpus.len();
    let services = SearchServices::from_corpus(embedding_provider, corpus, validator);
    let engine = SearchEngine::with_builtin_lexicon(services, tuning)?;

    let api_state = ApiState::new(config, engine, images);

    // Create Axum router
    Ok(Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state }))
}

/// Tuning from the `search` config section. The top-level `validator_timeout_ms` always wins.
fn search_tuning(config: &AppConfig) -> Result<SearchTuning, serde_json::Error> {
    let mut tuning = match &config.search {
        Some(section) => serde_json::from_value::<SearchTuning>(section.clone())?,
        None => SearchTuning::default(),
    };
    tuning.validator_timeout_ms = config.validator_timeout_ms;
    Ok(tuning)
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
