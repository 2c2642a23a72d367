//! LLM Module - external chat-completion providers used by the answer pipeline.
//!
//! Three roles share this interface: the subject classifier and the question
//! condenser (short non-streaming calls on a fast model) and the answer
//! generator (streaming on a larger model).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod simple_external;
pub mod streaming;

pub use simple_external::SimpleExternalProvider;
pub use streaming::TokenStream;

/// External API providers. All of them speak the OpenAI chat-completions dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiProvider {
    Groq,
    OpenAI,
    OpenRouter,
    Together,
    Ollama,
    Custom { endpoint: String },
}

impl ApiProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Groq => "Groq",
            Self::OpenAI => "OpenAI",
            Self::OpenRouter => "OpenRouter",
            Self::Together => "Together",
            Self::Ollama => "Ollama",
            Self::Custom { .. } => "Custom",
        }
    }

    pub fn chat_endpoint(&self) -> String {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions".to_string(),
            Self::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            Self::OpenRouter => "https://openrouter.ai/api/v1/chat/completions".to_string(),
            Self::Together => "https://api.together.xyz/v1/chat/completions".to_string(),
            Self::Ollama => "http://localhost:11434/v1/chat/completions".to_string(),
            Self::Custom { endpoint } => endpoint.clone(),
        }
    }
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Generate with streaming
    async fn generate_stream(&self, prompt: &str, config: &GenerationConfig)
        -> Result<TokenStream>;

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.0,
            top_p: 1.0,
            stop_sequences: vec![],
        }
    }
}

impl GenerationConfig {
    /// Deterministic, short output for one-word or one-line answers.
    pub fn short(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_streaming: bool,
}
