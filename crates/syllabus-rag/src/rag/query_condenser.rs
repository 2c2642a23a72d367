//! Follow-up question condensation.
//!
//! Rewrites a follow-up into a standalone question using the transcript, so
//! retrieval sees the full intent ("and its function?" becomes "What is the
//! function of the mitochondrion?").

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::llm::{GenerationConfig, LLMProvider};
use crate::types::TurnPair;

use super::history::format_chat_history;
use super::prompts::build_condense_prompt;

const CONDENSE_MAX_TOKENS: usize = 256;

pub struct QueryCondenser {
    llm: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl QueryCondenser {
    pub fn new(llm: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Standalone form of `question`. With no history the question is
    /// returned as-is without an upstream call. An empty completion also
    /// falls back to the original question.
    pub async fn condense(&self, question: &str, history: &[TurnPair]) -> Result<String, PipelineError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = build_condense_prompt(&format_chat_history(history), question);
        let config = GenerationConfig::short(CONDENSE_MAX_TOKENS);
        let start = Instant::now();

        let raw = tokio::time::timeout(self.timeout, self.llm.generate(&prompt, &config))
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: "condensation",
                after: self.timeout,
            })?
            .map_err(PipelineError::Condensation)?;

        let standalone = raw.trim();
        let standalone = if standalone.is_empty() {
            question.to_string()
        } else {
            standalone.replace(['\r', '\n'], " ")
        };

        tracing::debug!(
            original = %question,
            standalone = %standalone,
            turns = history.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Condensed follow-up question"
        );

        Ok(standalone)
    }
}
