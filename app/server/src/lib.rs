//! HTTP server streaming syllabus-grounded answers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use syllabus_rag::{Answer, AnswerPipeline, ChatRequest, PipelineError, TutorConfig};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<AnswerPipeline>,
}

impl AppState {
    pub fn new(pipeline: AnswerPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::info!(error = %rejection.body_text(), "Rejected malformed chat request");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };
    match state.pipeline.answer(request).await {
        Ok(answer) => stream_response(answer),
        Err(err) => error_response(err),
    }
}

fn stream_response(answer: Answer) -> Response {
    let Answer {
        request_id,
        stream,
        completion,
    } = answer;

    // Hand the finished turn to the persistence layer once the body is done.
    tokio::spawn(async move {
        match completion.await {
            Ok(Ok(turn)) => tracing::info!(
                request_id = %request_id,
                subject = %turn.subject,
                answer_len = turn.answer.len(),
                citations = turn.citations.len(),
                redirected_to = ?turn.redirected_to,
                "Turn completed"
            ),
            Ok(Err(PipelineError::Cancelled)) => {
                tracing::info!(request_id = %request_id, "Client left before the answer completed")
            }
            Ok(Err(err)) => tracing::warn!(request_id = %request_id, error = %err, "Answer ended with error"),
            Err(err) => tracing::error!(request_id = %request_id, error = %err, "Answer task panicked"),
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

fn error_response(err: PipelineError) -> Response {
    let status = if err.is_validation() {
        tracing::info!(error = %err, "Rejected chat request");
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "Failed to start answer");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(serde_json::json!({ "error": err.user_message() }))).into_response()
}

/// `SYLLABUS_RAG_CONFIG` names a JSON config file; without it defaults plus
/// environment overrides are used.
pub fn load_config() -> anyhow::Result<TutorConfig> {
    let path = std::env::var_os("SYLLABUS_RAG_CONFIG");
    load_config_from(path.as_deref().map(Path::new))
}

pub fn load_config_from(path: Option<&Path>) -> anyhow::Result<TutorConfig> {
    match path {
        Some(path) => TutorConfig::from_file(path).map_err(anyhow::Error::msg),
        None => Ok(TutorConfig::default().with_env_overrides()),
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = load_config()?;
    let pipeline = AnswerPipeline::from_config(&config)?;

    let addr: SocketAddr = std::env::var("SYLLABUS_RAG_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;

    tracing::info!(
        addr = %addr,
        provider = config.llm.provider.name(),
        answer_model = %config.llm.answer_model,
        data_dir = %config.data_dir.display(),
        "Answer API listening on http://{}/api/chat",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(AppState::new(pipeline))).await?;

    Ok(())
}
