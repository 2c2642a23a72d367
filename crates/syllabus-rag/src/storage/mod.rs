pub mod lance_store;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub use lance_store::LanceStore;

use crate::types::{RetrievedPassage, Subject};

/// A passage returned by similarity search, with the stored embedding kept
/// for diversity re-ranking.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: RetrievedPassage,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
    pub vector: Vec<f32>,
}

/// Similarity search over a subject namespace.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, subject: Subject, query: &[f32], limit: usize)
        -> Result<Vec<ScoredPassage>>;
}

#[async_trait]
impl VectorIndex for LanceStore {
    async fn search(
        &self,
        subject: Subject,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        self.vector_search(subject, query, limit).await
    }
}

/// Process-wide handle to the LanceDB store.
///
/// The connection (and the per-subject tables) are created on first use,
/// exactly once, and shared read-only afterwards. Concurrent first callers
/// wait on the same initialization.
pub struct SharedStore {
    path: PathBuf,
    dimension: usize,
    cell: OnceCell<Arc<LanceStore>>,
}

impl SharedStore {
    pub fn new(path: PathBuf, dimension: usize) -> Self {
        Self {
            path,
            dimension,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<LanceStore>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!(path = %self.path.display(), "Initializing LanceDB store");
                let store = LanceStore::connect(&self.path, self.dimension).await?;
                store.ensure_all_tables().await?;
                Ok::<_, anyhow::Error>(Arc::new(store))
            })
            .await?;
        Ok(store.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl VectorIndex for SharedStore {
    async fn search(
        &self,
        subject: Subject,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        self.get().await?.vector_search(subject, query, limit).await
    }
}
