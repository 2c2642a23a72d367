//! Subject router
//!
//! One short, non-streaming completion labels the question with a single
//! subject or `general`. The label decides whether the question is answered
//! here or redirected to another subject's assistant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::llm::{GenerationConfig, LLMProvider};
use crate::types::{Subject, SubjectLabel};

use super::prompts::build_classifier_prompt;

/// A single word is expected; a few extra tokens tolerate stray whitespace.
const CLASSIFIER_MAX_TOKENS: usize = 8;

pub struct SubjectRouter {
    llm: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl SubjectRouter {
    pub fn new(llm: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify `question`. Any reply other than exactly one of the four
    /// labels (after trimming and lowercasing) is `General`.
    pub async fn classify(&self, question: &str) -> Result<SubjectLabel, PipelineError> {
        let prompt = build_classifier_prompt(question);
        let config = GenerationConfig::short(CLASSIFIER_MAX_TOKENS);
        let start = Instant::now();

        let raw = tokio::time::timeout(self.timeout, self.llm.generate(&prompt, &config))
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: "classification",
                after: self.timeout,
            })?
            .map_err(PipelineError::Classification)?;

        let normalized = raw.trim().to_lowercase();
        let label = SubjectLabel::from_label(&normalized);

        tracing::info!(
            raw = %normalized,
            label = %label,
            latency_ms = start.elapsed().as_millis() as u64,
            "Subject classified"
        );

        Ok(label)
    }

    /// Like [`classify`](Self::classify), but a failed or timed-out call is `General`.
    pub async fn classify_or_general(&self, question: &str) -> SubjectLabel {
        match self.classify(question).await {
            Ok(label) => label,
            Err(err) => {
                tracing::warn!(error = %err, "Subject classification failed, treating as general");
                SubjectLabel::General
            }
        }
    }
}

/// Canned reply pointing the student at the right assistant.
pub fn redirect_message(detected: Subject, declared: Subject) -> String {
    format!(
        "This question is related to **{}**, not {}. Please switch to the **{}** assistant to get the answer.",
        detected.display_name(),
        declared.display_name(),
        detected.display_name()
    )
}
