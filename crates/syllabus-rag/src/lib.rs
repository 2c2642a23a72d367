pub mod chat;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod reranking;
pub mod retrieval;
pub mod storage;
pub mod stream;
pub mod types;

// Re-export primary types for convenience
pub use chat::{Answer, AnswerPipeline, PipelineState};
pub use client::{ChatClient, ClientError};
pub use config::TutorConfig;
pub use error::{PipelineError, USER_FACING_ERROR};
pub use ingest::{ingest_passages, read_passages};
pub use retrieval::RetrievalEngine;
pub use storage::{LanceStore, SharedStore};
pub use stream::{AnswerStream, DecodedAnswer, StreamDecoder, SENTINEL};
pub use types::{
    AnsweredTurn, ChatRequest, Citation, RetrievedPassage, Subject, SubjectLabel, TurnPair, MAX_CITATIONS,
};

// Re-export LLM types
pub use llm::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo};

// Re-export common types
pub use anyhow::{Error, Result};
