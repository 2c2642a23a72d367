//! Subject-scoped retrieval: embed, over-fetch by similarity, MMR down to `k`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::SearchConfig;
use crate::embeddings::EmbeddingModel;
use crate::reranking::maximal_marginal_relevance;
use crate::storage::VectorIndex;
use crate::types::{RetrievedPassage, Subject};

pub struct RetrievalEngine {
    embeddings: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    search: SearchConfig,
}

impl RetrievalEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        search: SearchConfig,
    ) -> Self {
        Self {
            embeddings,
            index,
            search,
        }
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }

    /// Ranked grounding passages for `question` from the subject's namespace.
    ///
    /// Returns at most `default_k` passages, most relevant first. An empty
    /// namespace yields an empty list, not an error.
    pub async fn retrieve(&self, subject: Subject, question: &str) -> Result<Vec<RetrievedPassage>> {
        let start = Instant::now();
        let k = self.search.default_k;
        let fetch_k = self.search.fetch_k();

        let query = self
            .embeddings
            .embed_query(question)
            .await
            .context("failed to embed question")?;

        let candidates = self
            .index
            .search(subject, &query, fetch_k)
            .await
            .with_context(|| format!("vector search failed for {}", subject))?;

        let order = maximal_marginal_relevance(&candidates, self.search.mmr_lambda, k);
        let mut slots: Vec<Option<RetrievedPassage>> =
            candidates.into_iter().map(|c| Some(c.passage)).collect();
        let passages: Vec<RetrievedPassage> = order
            .into_iter()
            .filter_map(|idx| slots.get_mut(idx).and_then(Option::take))
            .collect();

        tracing::info!(
            subject = %subject,
            fetch_k,
            candidates = slots.len(),
            selected = passages.len(),
            lambda = self.search.mmr_lambda,
            latency_ms = start.elapsed().as_millis() as u64,
            "Retrieved passages"
        );

        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ScoredPassage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbeddings;

    #[async_trait]
    impl EmbeddingModel for FixedEmbeddings {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        calls: Mutex<Vec<(Subject, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn search(&self, subject: Subject, _query: &[f32], limit: usize) -> Result<Vec<ScoredPassage>> {
            self.calls.lock().unwrap().push((subject, limit));
            if self.fail {
                anyhow::bail!("index offline");
            }
            Ok((0..limit.min(12))
                .map(|i| ScoredPassage {
                    passage: RetrievedPassage {
                        content: format!("chunk {}", i),
                        subtopic: "Cells".to_string(),
                        unit_number: 1,
                        source_file: "bio.pdf".to_string(),
                        page_start: i as u32,
                        page_end: i as u32,
                        content_type: "text".to_string(),
                        image_url: None,
                        latex: None,
                    },
                    score: 1.0 - i as f32 * 0.05,
                    vector: vec![1.0, i as f32],
                })
                .collect())
        }
    }

    fn search_config() -> SearchConfig {
        SearchConfig {
            default_k: 4,
            candidate_multiplier: 3,
            mmr_lambda: 1.0,
            citation_limit: 2,
        }
    }

    #[tokio::test]
    async fn test_retrieve_overfetches_and_truncates() {
        let index = Arc::new(RecordingIndex::default());
        let engine = RetrievalEngine::new(Arc::new(FixedEmbeddings), index.clone(), search_config());

        let passages = engine.retrieve(Subject::Biology, "what is a cell").await.unwrap();
        assert_eq!(passages.len(), 4);
        assert_eq!(passages[0].content, "chunk 0");
        assert_eq!(passages[3].content, "chunk 3");
        assert_eq!(index.calls.lock().unwrap().as_slice(), &[(Subject::Biology, 12)]);
    }

    #[tokio::test]
    async fn test_index_failure_is_an_error() {
        let index = Arc::new(RecordingIndex {
            fail: true,
            ..Default::default()
        });
        let engine = RetrievalEngine::new(Arc::new(FixedEmbeddings), index, search_config());
        let err = engine.retrieve(Subject::Physics, "ohm's law").await.unwrap_err();
        assert!(format!("{:#}", err).contains("index offline"));
    }
}
