use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{PipelineRun, PipelineState};
use crate::config::TutorConfig;
use crate::embeddings::RemoteEmbeddings;
use crate::error::PipelineError;
use crate::llm::{ApiProvider, GenerationConfig, LLMProvider, SimpleExternalProvider, TokenStream};
use crate::rag::{build_answer_prompt, redirect_message, QueryCondenser, SubjectRouter};
use crate::retrieval::RetrievalEngine;
use crate::storage::SharedStore;
use crate::stream::{frame_channel, AnswerStream, EncodeError, StreamEncoder};
use crate::types::{select_citations, AnsweredTurn, ChatRequest, Citation, Subject, ValidatedRequest};

/// A started answer. The body is already flowing when this is returned;
/// `completion` resolves with the finished turn once the body is closed.
pub struct Answer {
    pub request_id: Uuid,
    pub stream: AnswerStream,
    pub completion: JoinHandle<Result<AnsweredTurn, PipelineError>>,
}

pub struct AnswerPipeline {
    router: SubjectRouter,
    condenser: QueryCondenser,
    answer_llm: Arc<dyn LLMProvider>,
    retrieval: RetrievalEngine,
    generation: GenerationConfig,
    generation_timeout: Duration,
    citation_limit: usize,
    metadata_delay: Duration,
    channel_capacity: usize,
}

impl AnswerPipeline {
    pub fn new(
        classifier_llm: Arc<dyn LLMProvider>,
        condense_llm: Arc<dyn LLMProvider>,
        answer_llm: Arc<dyn LLMProvider>,
        retrieval: RetrievalEngine,
        config: &TutorConfig,
    ) -> Self {
        Self {
            router: SubjectRouter::new(classifier_llm, config.timeouts.classification()),
            condenser: QueryCondenser::new(condense_llm, config.timeouts.condensation()),
            answer_llm,
            retrieval,
            generation: GenerationConfig {
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
                ..Default::default()
            },
            generation_timeout: config.timeouts.generation(),
            citation_limit: config.search.citation_limit,
            metadata_delay: config.stream.metadata_delay(),
            channel_capacity: config.stream.channel_capacity,
        }
    }

    /// Wire up hosted providers and the shared LanceDB store from config.
    /// The store itself is opened on the first search.
    pub fn from_config(config: &TutorConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        if config.llm.api_key.trim().is_empty() && config.llm.provider != ApiProvider::Ollama {
            tracing::warn!(provider = config.llm.provider.name(), "No LLM API key configured");
        }

        let fast: Arc<dyn LLMProvider> = Arc::new(SimpleExternalProvider::new(
            config.llm.provider.clone(),
            config.llm.api_key.clone(),
            config.llm.fast_model.clone(),
        )?);
        let answer: Arc<dyn LLMProvider> = Arc::new(SimpleExternalProvider::new(
            config.llm.provider.clone(),
            config.llm.api_key.clone(),
            config.llm.answer_model.clone(),
        )?);

        let embeddings = Arc::new(RemoteEmbeddings::new(&config.embedding)?);
        let store = Arc::new(SharedStore::new(config.lance_path(), config.embedding.dimension));
        let retrieval = RetrievalEngine::new(embeddings, store, config.search.clone());

        Ok(Self::new(fast.clone(), fast, answer, retrieval, config))
    }

    /// Run everything up to the first generated token, then hand the rest of
    /// the answer to a background task writing into the returned stream.
    ///
    /// Validation and any failure before streaming starts come back as `Err`
    /// with no stream opened.
    pub async fn answer(&self, request: ChatRequest) -> Result<Answer, PipelineError> {
        let request = ValidatedRequest::try_from(request)?;
        let mut run = PipelineRun::new();
        let request_id = run.id();

        tracing::info!(
            request_id = %request_id,
            subject = %request.subject,
            turns = request.history.len(),
            "Answering question"
        );

        run.advance(PipelineState::Classifying)?;
        let label = self.router.classify_or_general(&request.question).await;

        if let Some(detected) = label.redirect_target(request.subject) {
            run.advance(PipelineState::ShortCircuitRedirect)?;
            tracing::info!(
                request_id = %request_id,
                declared = %request.subject,
                detected = %detected,
                "Question belongs to another subject, redirecting"
            );
            let (encoder, stream) = frame_channel(self.channel_capacity);
            let completion = tokio::spawn(stream_redirect(
                run,
                encoder,
                request,
                detected,
                self.metadata_delay,
            ));
            return Ok(Answer {
                request_id,
                stream,
                completion,
            });
        }

        run.advance(PipelineState::Retrieving)?;
        let standalone = self
            .condenser
            .condense(&request.question, &request.history)
            .await?;
        let passages = self
            .retrieval
            .retrieve(request.subject, &standalone)
            .await
            .map_err(PipelineError::Retrieval)?;
        let citations = select_citations(&passages, self.citation_limit);
        let prompt = build_answer_prompt(&passages, &standalone);

        run.advance(PipelineState::Generating)?;
        let deadline = tokio::time::Instant::now() + self.generation_timeout;
        let tokens = match tokio::time::timeout_at(
            deadline,
            self.answer_llm.generate_stream(&prompt, &self.generation),
        )
        .await
        {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(err)) => return Err(PipelineError::Generation(err)),
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: "generation",
                    after: self.generation_timeout,
                })
            }
        };

        let (encoder, stream) = frame_channel(self.channel_capacity);
        let completion = tokio::spawn(stream_answer(GroundedStream {
            run,
            encoder,
            tokens,
            request,
            citations,
            deadline,
            timeout: self.generation_timeout,
            metadata_delay: self.metadata_delay,
        }));

        Ok(Answer {
            request_id,
            stream,
            completion,
        })
    }
}

fn encode_failure(err: EncodeError) -> PipelineError {
    match err {
        EncodeError::Disconnected => PipelineError::Cancelled,
        other => PipelineError::Protocol(other),
    }
}

fn close(run: &mut PipelineRun) {
    if !run.state().is_terminal() {
        let _ = run.advance(PipelineState::Closed);
    }
}

async fn stream_redirect(
    mut run: PipelineRun,
    mut encoder: StreamEncoder,
    request: ValidatedRequest,
    detected: Subject,
    metadata_delay: Duration,
) -> Result<AnsweredTurn, PipelineError> {
    let message = redirect_message(detected, request.subject);

    if let Err(err) = encoder.write_redirect(&message).await {
        close(&mut run);
        return Err(encode_failure(err));
    }

    run.advance(PipelineState::Finalizing)?;
    let finished = encoder.finish(&[], metadata_delay).await;
    close(&mut run);
    finished.map_err(encode_failure)?;

    Ok(AnsweredTurn {
        question: request.question,
        subject: request.subject,
        answer: message,
        citations: Vec::new(),
        redirected_to: Some(detected),
    })
}

struct GroundedStream {
    run: PipelineRun,
    encoder: StreamEncoder,
    tokens: TokenStream,
    request: ValidatedRequest,
    citations: Vec<Citation>,
    deadline: tokio::time::Instant,
    timeout: Duration,
    metadata_delay: Duration,
}

async fn stream_answer(job: GroundedStream) -> Result<AnsweredTurn, PipelineError> {
    let GroundedStream {
        mut run,
        mut encoder,
        mut tokens,
        request,
        citations,
        deadline,
        timeout,
        metadata_delay,
    } = job;
    let request_id = run.id();
    let start = Instant::now();
    let mut answer = String::new();
    let mut token_count = 0usize;

    loop {
        let next = tokio::select! {
            _ = encoder.closed() => None,
            item = tokio::time::timeout_at(deadline, tokens.next()) => Some(item),
        };

        match next {
            None => {
                close(&mut run);
                tracing::info!(request_id = %request_id, tokens = token_count, "Client disconnected, cancelling generation");
                return Err(PipelineError::Cancelled);
            }
            Some(Err(_elapsed)) => {
                let err = PipelineError::Timeout {
                    stage: "generation",
                    after: timeout,
                };
                tracing::warn!(request_id = %request_id, tokens = token_count, "Generation timed out mid-stream");
                encoder.abort(err.user_message()).await;
                close(&mut run);
                return Err(err);
            }
            Some(Ok(None)) => break,
            Some(Ok(Some(Err(upstream)))) => {
                let err = PipelineError::Generation(upstream);
                tracing::warn!(request_id = %request_id, error = %err, "Generation failed mid-stream");
                encoder.abort(err.user_message()).await;
                close(&mut run);
                return Err(err);
            }
            Some(Ok(Some(Ok(token)))) => {
                if let Err(err) = encoder.write_content(&token).await {
                    close(&mut run);
                    return Err(encode_failure(err));
                }
                answer.push_str(&token);
                token_count += 1;
            }
        }
    }
    drop(tokens);

    run.advance(PipelineState::Finalizing)?;
    let finished = encoder.finish(&citations, metadata_delay).await;
    close(&mut run);
    if let Err(err) = finished {
        tracing::debug!(request_id = %request_id, error = %err, "Client left during finalization");
        return Err(encode_failure(err));
    }

    tracing::info!(
        request_id = %request_id,
        tokens = token_count,
        citations = citations.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Answer streamed"
    );

    Ok(AnsweredTurn {
        question: request.question,
        subject: request.subject,
        answer: answer.trim().to_string(),
        citations,
        redirected_to: None,
    })
}
