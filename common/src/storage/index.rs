use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::types::image_record::{ImageEmbeddings, ImageMetadata};

/// One nearest-neighbour hit as reported by a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
}

impl VectorHit {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Approximate cosine nearest-neighbour search over global image embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>, AppError>;
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn get_embeddings(&self, id: &str) -> Result<Option<ImageEmbeddings>, AppError>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(&self, id: &str) -> Result<Option<ImageMetadata>, AppError>;
}
