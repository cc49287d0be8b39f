use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    error::AppError,
    storage::{
        index::{EmbeddingStore, MetadataStore, VectorHit, VectorIndex},
        types::{
            image_record::{ImageEmbeddings, ImageMetadata, ImageRecord},
            StoredObject,
        },
    },
    utils::embedding::cosine_similarity,
};

/// Read-only, in-memory image corpus. Serves exact cosine search plus embedding and
/// metadata lookups; shared across requests behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    records: Vec<ImageRecord>,
    positions: HashMap<String, usize>,
    dimension: usize,
}

impl InMemoryCorpus {
    pub fn from_records(records: Vec<ImageRecord>) -> Result<Self, AppError> {
        let dimension = records
            .first()
            .map_or(0, |record| record.global_embedding.len());

        let mut normalized = Vec::with_capacity(records.len());
        let mut positions = HashMap::with_capacity(records.len());
        for record in records {
            let record = record.normalized(dimension)?;
            if positions
                .insert(record.get_id().to_owned(), normalized.len())
                .is_some()
            {
                return Err(AppError::Validation(format!(
                    "duplicate {} id {}",
                    ImageRecord::kind_name(),
                    record.id
                )));
            }
            normalized.push(record);
        }

        Ok(Self {
            records: normalized,
            positions,
            dimension,
        })
    }

    /// Loads a JSON array of image records.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        let records: Vec<ImageRecord> = serde_json::from_slice(&raw)?;
        let corpus = Self::from_records(records)?;
        info!(
            path = %path.display(),
            images = corpus.len(),
            dimension = corpus.dimension,
            "Loaded image corpus"
        );
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn get(&self, id: &str) -> Option<&ImageRecord> {
        self.positions
            .get(id)
            .and_then(|position| self.records.get(*position))
    }
}

#[async_trait]
impl VectorIndex for InMemoryCorpus {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>, AppError> {
        if top_k == 0 {
            return Err(AppError::Validation("top_k must be positive".into()));
        }
        if !self.is_empty() && embedding.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query embedding has dimension {}, corpus uses {}",
                embedding.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<VectorHit> = self
            .records
            .iter()
            .map(|record| {
                VectorHit::new(
                    &record.id,
                    cosine_similarity(embedding, &record.global_embedding),
                )
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);

        debug!(returned = hits.len(), top_k, "Corpus vector query");
        Ok(hits)
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryCorpus {
    async fn get_embeddings(&self, id: &str) -> Result<Option<ImageEmbeddings>, AppError> {
        Ok(self.get(id).map(ImageRecord::embeddings))
    }
}

#[async_trait]
impl MetadataStore for InMemoryCorpus {
    async fn get_metadata(&self, id: &str) -> Result<Option<ImageMetadata>, AppError> {
        Ok(self.get(id).and_then(|record| record.metadata.clone()))
    }
}
