use serde::{Deserialize, Serialize};

use crate::{error::AppError, utils::embedding::l2_normalize};

use super::StoredObject;

/// Textual description attached to an image at indexing time. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Time of day, e.g. "night" or "sunset".
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
}

/// Global plus per-region embeddings of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEmbeddings {
    pub global: Vec<f32>,
    #[serde(default)]
    pub locals: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub global_embedding: Vec<f32>,
    #[serde(default)]
    pub local_embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadata: Option<ImageMetadata>,
}

impl StoredObject for ImageRecord {
    fn kind_name() -> &'static str {
        "image"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, global_embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            global_embedding,
            local_embeddings: Vec::new(),
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_local_embeddings(mut self, locals: Vec<Vec<f32>>) -> Self {
        self.local_embeddings = locals;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn embeddings(&self) -> ImageEmbeddings {
        ImageEmbeddings {
            global: self.global_embedding.clone(),
            locals: self.local_embeddings.clone(),
        }
    }

    /// Checks dimensions against `dimension` and rescales every vector to unit length.
    pub fn normalized(mut self, dimension: usize) -> Result<Self, AppError> {
        if self.global_embedding.len() != dimension {
            return Err(AppError::Validation(format!(
                "image {} has global embedding of dimension {}, expected {dimension}",
                self.id,
                self.global_embedding.len()
            )));
        }
        if let Some(local) = self
            .local_embeddings
            .iter()
            .find(|local| local.len() != dimension)
        {
            return Err(AppError::Validation(format!(
                "image {} has local embedding of dimension {}, expected {dimension}",
                self.id,
                local.len()
            )));
        }

        self.global_embedding = l2_normalize(self.global_embedding);
        self.local_embeddings = self.local_embeddings.into_iter().map(l2_normalize).collect();
        Ok(self)
    }
}
