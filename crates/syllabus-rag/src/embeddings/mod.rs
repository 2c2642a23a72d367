pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use remote::RemoteEmbeddings;

/// Hosted embedding APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmbeddingProvider {
    /// Nomic Atlas (`nomic-embed-text-v1.5`, task-typed inputs).
    Nomic,
    /// Any OpenAI-compatible `/embeddings` endpoint.
    OpenAICompatible { base_url: String },
}

/// Unified embedding model trait
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed passages for ingestion
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embedding vector dimension
    fn dimension(&self) -> usize;
}
