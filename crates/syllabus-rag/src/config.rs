use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embeddings::EmbeddingProvider;
use crate::llm::ApiProvider;
use crate::types::MAX_CITATIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    pub data_dir: PathBuf,
    pub llm: LlmSettings,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub timeouts: TimeoutConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: ApiProvider,
    #[serde(default)]
    pub api_key: String,
    /// Streaming model that writes the grounded answer.
    pub answer_model: String,
    /// Low-latency model used for classification and condensation.
    pub fast_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Final number of passages handed to the generator as context.
    pub default_k: usize,
    /// Over-fetch factor for the similarity pool before diversity re-ranking.
    pub candidate_multiplier: usize,
    /// MMR blend: 1.0 = pure similarity, 0.0 = maximal diversity.
    pub mmr_lambda: f32,
    /// Passages exposed to the client as citations.
    pub citation_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub classification_secs: u64,
    pub condensation_secs: u64,
    pub generation_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pause between the sentinel and the citation payload.
    pub metadata_delay_ms: u64,
    pub channel_capacity: usize,
}

impl SearchConfig {
    pub fn fetch_k(&self) -> usize {
        self.default_k * self.candidate_multiplier
    }
}

impl TimeoutConfig {
    pub fn classification(&self) -> Duration {
        Duration::from_secs(self.classification_secs)
    }

    pub fn condensation(&self) -> Duration {
        Duration::from_secs(self.condensation_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

impl StreamConfig {
    pub fn metadata_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_delay_ms)
    }
}

impl TutorConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.search.default_k == 0 {
            return Err("search.default_k must be > 0".into());
        }
        if self.search.candidate_multiplier == 0 {
            return Err("search.candidate_multiplier must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.search.mmr_lambda) {
            return Err("search.mmr_lambda must be in [0.0, 1.0]".into());
        }
        if self.search.citation_limit == 0 || self.search.citation_limit > MAX_CITATIONS {
            return Err(format!(
                "search.citation_limit must be between 1 and {}",
                MAX_CITATIONS
            ));
        }
        if self.timeouts.classification_secs == 0
            || self.timeouts.condensation_secs == 0
            || self.timeouts.generation_secs == 0
        {
            return Err("timeouts must be > 0 seconds".into());
        }
        if self.stream.channel_capacity == 0 {
            return Err("stream.channel_capacity must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Fill API keys and data dir from the environment when present.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = env_first(&["LLM_API_KEY", "GROQ_API_KEY"]) {
            self.llm.api_key = key;
        }
        if let Some(key) = env_first(&["EMBEDDING_API_KEY", "NOMIC_API_KEY"]) {
            self.embedding.api_key = key;
        }
        if let Ok(dir) = std::env::var("SYLLABUS_RAG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("lance_data")
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
}

impl Default for TutorConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syllabus-rag");

        Self {
            data_dir,
            llm: LlmSettings {
                provider: ApiProvider::Groq,
                api_key: String::new(),
                answer_model: "llama-3.3-70b-versatile".to_string(),
                fast_model: "llama-3.1-8b-instant".to_string(),
                temperature: 0.0,
                max_tokens: 4096,
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Nomic,
                api_key: String::new(),
                model: "nomic-embed-text-v1.5".to_string(),
                dimension: 768,
                max_retries: 3,
            },
            search: SearchConfig {
                default_k: 10,
                candidate_multiplier: 3,
                mmr_lambda: 0.7,
                citation_limit: 2,
            },
            timeouts: TimeoutConfig {
                classification_secs: 10,
                condensation_secs: 15,
                generation_secs: 120,
            },
            stream: StreamConfig {
                metadata_delay_ms: 100,
                channel_capacity: 256,
            },
        }
    }
}
