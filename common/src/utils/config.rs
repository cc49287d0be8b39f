use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use super::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// JSON file holding the indexed image records served by this instance.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    /// FastEmbed model code; the CLIP text encoder is used when unset.
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Only used by the hashed backend.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default = "default_search_top_k")]
    pub search_default_top_k: usize,
    #[serde(default)]
    pub validator_enabled: bool,
    #[serde(default)]
    pub validator_endpoint: Option<Url>,
    #[serde(default = "default_validator_timeout_ms")]
    pub validator_timeout_ms: u64,
    /// Search tuning overrides, deserialized by the search engine. Unset keys keep their
    /// defaults.
    #[serde(default)]
    pub search: Option<serde_json::Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            corpus_path: default_corpus_path(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_dimension: default_embedding_dimension(),
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            search_default_top_k: default_search_top_k(),
            validator_enabled: false,
            validator_endpoint: None,
            validator_timeout_ms: default_validator_timeout_ms(),
            search: None,
        }
    }
}

const fn default_http_port() -> u16 {
    3000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_corpus_path() -> String {
    "./data/corpus.json".to_string()
}

const fn default_embedding_dimension() -> usize {
    512
}

const fn default_search_top_k() -> usize {
    20
}

const fn default_validator_timeout_ms() -> u64 {
    2_000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
