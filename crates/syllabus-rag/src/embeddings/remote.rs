//! HTTP embedding client for Nomic Atlas and OpenAI-compatible endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{EmbeddingModel, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const NOMIC_ENDPOINT: &str = "https://api-atlas.nomic.ai/v1/embedding/text";

#[derive(Clone)]
pub struct RemoteEmbeddings {
    client: Client,
    provider: EmbeddingProvider,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: usize,
}

#[derive(Debug, Clone, Copy)]
enum TaskType {
    Query,
    Document,
}

impl TaskType {
    fn nomic_name(self) -> &'static str {
        match self {
            Self::Query => "search_query",
            Self::Document => "search_document",
        }
    }
}

impl RemoteEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!config.model.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;

        let endpoint = match &config.provider {
            EmbeddingProvider::Nomic => NOMIC_ENDPOINT.to_string(),
            EmbeddingProvider::OpenAICompatible { base_url } => {
                format!("{}/embeddings", base_url.trim_end_matches('/'))
            }
        };

        Ok(Self {
            client,
            provider: config.provider.clone(),
            endpoint,
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries.max(1),
        })
    }

    fn request_body(&self, inputs: &[&str], task: TaskType) -> serde_json::Value {
        match self.provider {
            EmbeddingProvider::Nomic => serde_json::to_value(NomicRequest {
                model: &self.model,
                texts: inputs,
                task_type: task.nomic_name(),
            }),
            EmbeddingProvider::OpenAICompatible { .. } => serde_json::to_value(OpenAiRequest {
                model: &self.model,
                input: inputs,
            }),
        }
        .unwrap_or_default()
    }

    fn parse_response(&self, body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
        let vectors = match self.provider {
            EmbeddingProvider::Nomic => {
                let parsed: NomicResponse =
                    serde_json::from_str(body).context("failed to parse Nomic embedding response")?;
                parsed.embeddings
            }
            EmbeddingProvider::OpenAICompatible { .. } => {
                let mut parsed: OpenAiResponse =
                    serde_json::from_str(body).context("failed to parse embedding response")?;
                parsed.data.sort_by_key(|entry| entry.index);
                parsed.data.into_iter().map(|entry| entry.embedding).collect()
            }
        };
        anyhow::ensure!(
            vectors.len() == expected,
            "embedding API returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            anyhow::bail!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.len()
            );
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, inputs: &[&str], task: TaskType) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.request_body(inputs, task);
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if status.is_success() {
                        return self.parse_response(&text, inputs.len());
                    }
                    if Self::should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(status = %status, attempt, "Embedding request failed, retrying");
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    anyhow::bail!("embedding request failed ({}): {}", status, text);
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "Embedding request errored, retrying");
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err).context("embedding request failed");
                }
            }
        }
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(250 * (1 << capped))
    }
}

#[async_trait]
impl EmbeddingModel for RemoteEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text], TaskType::Query).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding API returned no vector"))
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts, TaskType::Document).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct NomicRequest<'a> {
    model: &'a str,
    texts: &'a [&'a str],
    task_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct NomicResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: EmbeddingProvider) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            api_key: "test-key".to_string(),
            model: "nomic-embed-text-v1.5".to_string(),
            dimension: 3,
            max_retries: 2,
        }
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let mut cfg = config(EmbeddingProvider::Nomic);
        cfg.api_key = "  ".to_string();
        assert!(RemoteEmbeddings::new(&cfg).is_err());
    }

    #[test]
    fn test_nomic_request_uses_task_type() {
        let emb = RemoteEmbeddings::new(&config(EmbeddingProvider::Nomic)).unwrap();
        let body = emb.request_body(&["what is osmosis"], TaskType::Query);
        assert_eq!(body["task_type"], "search_query");
        assert_eq!(body["texts"][0], "what is osmosis");
    }

    #[test]
    fn test_openai_response_is_reordered_by_index() {
        let emb = RemoteEmbeddings::new(&config(EmbeddingProvider::OpenAICompatible {
            base_url: "http://localhost:8080/v1/".to_string(),
        }))
        .unwrap();
        assert_eq!(emb.endpoint, "http://localhost:8080/v1/embeddings");
        let body = r#"{"data":[{"embedding":[0,0,1],"index":1},{"embedding":[1,0,0],"index":0}]}"#;
        let vectors = emb.parse_response(body, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let emb = RemoteEmbeddings::new(&config(EmbeddingProvider::Nomic)).unwrap();
        let err = emb.parse_response(r#"{"embeddings":[[1.0,2.0]]}"#, 1).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
