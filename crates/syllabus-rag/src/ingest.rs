//! Loading reference passages into a subject namespace.

use anyhow::{Context, Result};
use std::io::{BufRead, Read};
use std::time::Instant;

use crate::embeddings::EmbeddingModel;
use crate::storage::LanceStore;
use crate::types::{RetrievedPassage, Subject};

/// Read passage records from either a JSON array or JSONL (one object per
/// line, blank lines ignored).
pub fn read_passages<R: BufRead>(mut reader: R) -> Result<Vec<RetrievedPassage>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .context("failed to read passage input")?;

    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text).context("failed to parse passage array");
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("failed to parse passage on line {}", idx + 1))
        })
        .collect()
}

/// Embed `passages` in batches of `batch_size` and append them to the
/// subject's table. Returns the number of passages written.
pub async fn ingest_passages(
    embeddings: &dyn EmbeddingModel,
    store: &LanceStore,
    subject: Subject,
    passages: Vec<RetrievedPassage>,
    batch_size: usize,
) -> Result<usize> {
    let start = Instant::now();
    let batch_size = batch_size.max(1);
    let total = passages.len();
    let mut written = 0usize;

    store.ensure_subject_table(subject).await?;

    for batch in passages.chunks(batch_size) {
        let texts: Vec<&str> = batch.iter().map(|p| p.content.as_str()).collect();
        let vectors = embeddings
            .embed_documents(&texts)
            .await
            .with_context(|| format!("failed to embed passages {}..{}", written, written + batch.len()))?;
        anyhow::ensure!(
            vectors.len() == batch.len(),
            "embedding service returned {} vectors for {} passages",
            vectors.len(),
            batch.len()
        );

        let rows: Vec<(RetrievedPassage, Vec<f32>)> = batch.iter().cloned().zip(vectors).collect();
        store.add_passages(subject, rows).await?;
        written += batch.len();
        tracing::info!(subject = %subject, written, total, "Ingested passage batch");
    }

    tracing::info!(
        subject = %subject,
        passages = written,
        latency_ms = start.elapsed().as_millis() as u64,
        "Ingestion complete"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct KeywordEmbeddings {
        batches: AtomicUsize,
    }

    fn keyword_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        vec![
            if lower.contains("acid") { 1.0 } else { 0.0 },
            if lower.contains("base") { 1.0 } else { 0.0 },
            if lower.contains("salt") { 1.0 } else { 0.1 },
        ]
    }

    #[async_trait]
    impl EmbeddingModel for KeywordEmbeddings {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(keyword_vector(text))
        }

        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| keyword_vector(t)).collect())
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct ShortEmbeddings;

    #[async_trait]
    impl EmbeddingModel for ShortEmbeddings {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn embed_documents(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0, 0.0]])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    const JSONL: &str = r#"{"content":"Acids turn blue litmus red.","subtopic":"Acids","unit_number":2,"source_file":"chem_unit2.pdf","page_start":4,"page_end":4,"content_type":"text"}

{"content":"A base accepts protons.","subtopic":"Bases","unit_number":2,"source_file":"chem_unit2.pdf","page_start":6,"page_end":7,"content_type":"text","latex":null}
{"content":"Neutralization forms a salt and water.","subtopic":"Salts","unit_number":2,"source_file":"chem_unit2.pdf","page_start":9,"page_end":9,"content_type":"equation","latex":"HCl + NaOH -> NaCl + H_2O"}
"#;

    #[test]
    fn test_reads_jsonl_and_skips_blank_lines() {
        let passages = read_passages(JSONL.as_bytes()).unwrap();
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].subtopic, "Acids");
        assert!(passages[0].image_url.is_none());
        assert_eq!(passages[2].latex.as_deref(), Some("HCl + NaOH -> NaCl + H_2O"));
    }

    #[test]
    fn test_reads_json_array() {
        let passages = read_passages(JSONL.as_bytes()).unwrap();
        let array = serde_json::to_string_pretty(&passages).unwrap();
        assert_eq!(read_passages(array.as_bytes()).unwrap(), passages);
    }

    #[test]
    fn test_reports_bad_line_number() {
        let input = format!("{}\n{{\"content\": 3}}\n", JSONL.lines().next().unwrap());
        let err = read_passages(input.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[tokio::test]
    async fn test_ingested_passages_are_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::connect(dir.path(), 3).await.unwrap();
        let embeddings = KeywordEmbeddings::default();
        let passages = read_passages(JSONL.as_bytes()).unwrap();

        let written = ingest_passages(&embeddings, &store, Subject::Chemistry, passages, 2)
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(embeddings.batches.load(Ordering::SeqCst), 2);
        assert_eq!(store.count(Subject::Chemistry).await.unwrap(), 3);

        let query = embeddings.embed_query("What is a base?").await.unwrap();
        let hits = store.vector_search(Subject::Chemistry, &query, 1).await.unwrap();
        assert_eq!(hits[0].passage.subtopic, "Bases");
    }

    #[tokio::test]
    async fn test_mismatched_embedding_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::connect(dir.path(), 3).await.unwrap();
        let passages = read_passages(JSONL.as_bytes()).unwrap();

        let err = ingest_passages(&ShortEmbeddings, &store, Subject::Chemistry, passages, 8)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 vectors for 3 passages"));
        assert_eq!(store.count(Subject::Chemistry).await.unwrap(), 0);
    }
}
