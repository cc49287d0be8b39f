use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Turns query text into a unit vector living in the same space as the image embeddings.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    FastEmbed,
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'hashed' or 'fastembed'."
            )),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } | EmbeddingInner::FastEmbed { dimension, .. } => {
                *dimension
            }
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                let embeddings = guard
                    .embed(vec![text.to_owned()], None)
                    .context("generating fastembed vector")?;
                embeddings
                    .into_iter()
                    .next()
                    .map(l2_normalize)
                    .ok_or_else(|| anyhow!("fastembed returned no embedding for input"))
            }
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimension),
            EmbeddingBackend::FastEmbed => {
                let cache_dir = config.fastembed_cache_dir.as_ref().map_or_else(
                    || Path::new(&config.data_dir).join("fastembed"),
                    PathBuf::from,
                );
                Self::new_fastembed(
                    config.embedding_model.clone(),
                    cache_dir,
                    config.fastembed_show_download_progress.unwrap_or(true),
                )
                .await
            }
        }
    }

    pub async fn new_fastembed(
        model_override: Option<String>,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self> {
        // Queries are matched against CLIP image vectors, so the paired text tower is the default.
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?
        } else {
            EmbeddingModel::ClipVitB32
        };

        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("creating fastembed cache dir {}", cache_dir.display()))?;
        let options = TextInitOptions::new(model_name.clone())
            .with_cache_dir(cache_dir)
            .with_show_download_progress(show_download_progress);
        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        debug!(model = %model_name, dimension, "FastEmbed text encoder ready");

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }
}

#[async_trait]
impl TextEncoder for EmbeddingProvider {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embed(text).await.map_err(AppError::from)
    }
}

/// Scales a vector to unit length; zero vectors are returned untouched.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Dot product over the shared prefix; equals cosine similarity for unit vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    l2_normalize(vector)
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

#[allow(clippy::cast_possible_truncation)]
fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
