use std::sync::Arc;

use common::{
    storage::{
        corpus::InMemoryCorpus,
        index::{EmbeddingStore, MetadataStore, VectorIndex},
    },
    utils::embedding::TextEncoder,
};

use crate::{
    expansion::ExpansionTable,
    spelling::{SpellCorrector, SpellingThresholds},
    validation::SecondaryValidator,
};

/// External collaborators a search talks to. All are read-only and shared across requests.
#[derive(Clone)]
pub struct SearchServices {
    pub encoder: Arc<dyn TextEncoder>,
    pub index: Arc<dyn VectorIndex>,
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub metadata: Arc<dyn MetadataStore>,
    /// Present only when validation is switched on in configuration.
    pub validator: Option<SecondaryValidator>,
}

impl SearchServices {
    /// Serves index, embedding and metadata lookups from one in-memory corpus.
    pub fn from_corpus(
        encoder: Arc<dyn TextEncoder>,
        corpus: Arc<InMemoryCorpus>,
        validator: Option<SecondaryValidator>,
    ) -> Self {
        Self {
            encoder,
            index: Arc::clone(&corpus) as Arc<dyn VectorIndex>,
            embeddings: Arc::clone(&corpus) as Arc<dyn EmbeddingStore>,
            metadata: corpus as Arc<dyn MetadataStore>,
            validator,
        }
    }
}

/// Query-side lookup tables, built once at startup.
#[derive(Debug, Clone)]
pub struct QueryLexicon {
    pub expansion: Arc<ExpansionTable>,
    pub speller: Arc<SpellCorrector>,
}

impl QueryLexicon {
    pub fn new(expansion: ExpansionTable, spelling: SpellingThresholds) -> Self {
        let speller = SpellCorrector::from_table(&expansion, spelling);
        Self {
            expansion: Arc::new(expansion),
            speller: Arc::new(speller),
        }
    }

    pub fn builtin(spelling: SpellingThresholds) -> Self {
        Self::new(ExpansionTable::builtin().clone(), spelling)
    }
}
