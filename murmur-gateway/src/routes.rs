//! Route definitions for the Murmur gateway.
//!
//! All chat and RAG endpoints live under `/api/v1`; the health check sits
//! at the root. Streaming endpoints speak SSE with `{"token": ...}` data
//! events and a terminal `data: [DONE]` marker.

use crate::pipeline::{forward_stream, ChatCall, ChatPipeline, StreamEvent};
use crate::prompt::{self, PromptTemplate};
use crate::provider::{Message, ProviderRegistry};
use crate::rag::{DocumentIndexer, DocumentStore};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use futures_util::Stream;
use murmur_common::{Config, Error};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// System prompt used when a request names no prompt file.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Built-in RAG template used when a request names no prompt file.
const DEFAULT_RAG_TEMPLATE: &str = "Answer the question using only the context below.\n\
If the context does not contain the answer, say you don't know.\n\n\
Context:\n{context}\n\nQuestion: {question}";

/// Maximum accepted upload size.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    pub registry: Arc<ProviderRegistry>,
    pub documents: Arc<DocumentStore>,
    pub indexer: Arc<DocumentIndexer>,
    pub config: Arc<Config>,
}

/// Chat request body, shared by the blocking and streaming endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Prompt file name under the chatbot prompt directory.
    #[serde(default)]
    pub prompt_file: Option<String>,
    /// Role hint appended to the system prompt.
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Non-streaming chat response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    pub role: String,
}

/// RAG query body.
#[derive(Debug, Deserialize)]
pub struct RagQueryRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Prompt file name under the RAG prompt directory.
    #[serde(default)]
    pub prompt_file: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Prompt listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PromptsResponse {
    pub prompts: Vec<String>,
}

/// Session deletion response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub message: String,
    pub session_id: String,
}

/// Session existence response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionExistsResponse {
    pub session_id: String,
    pub exists: bool,
}

/// Upload confirmation.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub session_id: String,
    pub file_name: String,
    pub chunk_count: usize,
}

/// Uploaded-document status for a session.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub session_id: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
}

/// Domain error carried to the response boundary.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let code = match status {
            400 => "validation_error",
            404 => "not_found",
            502 => "provider_error",
            _ => "internal_error",
        };

        if status >= 500 {
            tracing::error!(error = %self.0, "Request failed");
        }

        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the complete router.
pub fn build_all_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat/message", post(chat_message))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/prompts", get(chat_prompts))
        .route("/chat/session/:id", delete(delete_session))
        .route("/chat/session/:id/exists", get(session_exists))
        .route(
            "/rag/upload",
            post(rag_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/rag/query", post(rag_query))
        .route("/rag/prompts", get(rag_prompts))
        .route("/rag/session/:id/document", get(rag_document));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Resolve the system prompt for a chat request.
///
/// Loads the named prompt file from the chatbot directory, extracts the
/// base instruction, and appends the role hint.
fn resolve_system_prompt(
    config: &Config,
    prompt_file: Option<&str>,
    task: &str,
) -> Result<String, Error> {
    let base = match prompt_file {
        Some(name) => {
            let path = prompt_path(&config.prompts.chatbot_dir, name)?;
            let template = prompt::load_prompt(&path)?;
            prompt::base_system_prompt(&template.template)
        }
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    Ok(prompt::compose_system_prompt(&base, task))
}

/// Join a prompt file name onto a prompt directory, rejecting names that
/// escape it.
fn prompt_path(dir: &str, name: &str) -> Result<std::path::PathBuf, Error> {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(Error::validation(format!("Invalid prompt file name: {}", name)));
    }
    Ok(std::path::Path::new(dir).join(name))
}

fn resolve_call(state: &AppState, request: &ChatRequest) -> Result<ChatCall, Error> {
    let system_prompt =
        resolve_system_prompt(&state.config, request.prompt_file.as_deref(), &request.task)?;

    Ok(ChatCall {
        session_id: request.session_id.clone(),
        message: request.message.clone(),
        model: request
            .model
            .clone()
            .unwrap_or_else(|| state.config.providers.default_model.clone()),
        temperature: request
            .temperature
            .unwrap_or(state.config.providers.default_temperature),
        system_prompt,
    })
}

/// Turn a pipeline event channel into an SSE response.
fn sse_from_events(
    rx: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = match event {
            StreamEvent::Token(token) => serde_json::json!({ "token": token }).to_string(),
            StreamEvent::Error(error) => serde_json::json!({ "error": error }).to_string(),
            StreamEvent::Done => "[DONE]".to_string(),
        };
        Ok(Event::default().data(data))
    });

    Sse::new(stream)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "murmur-gateway".to_string(),
    })
}

async fn chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let call = resolve_call(&state, &request)?;
    let session_id = call.session_id.clone();

    let message = state.pipeline.complete(call).await?;

    Ok(Json(ChatResponse {
        session_id,
        message,
        role: "assistant".to_string(),
    }))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let call = resolve_call(&state, &request)?;
    let rx = state.pipeline.stream(call).await?;
    Ok(sse_from_events(rx))
}

async fn chat_prompts(State(state): State<AppState>) -> Result<Json<PromptsResponse>, ApiError> {
    let prompts = prompt::list_prompts(std::path::Path::new(&state.config.prompts.chatbot_dir))?;
    Ok(Json(PromptsResponse { prompts }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<SessionResponse> {
    let cleared = state.pipeline.sessions().clear(&id).await;

    let message = if cleared {
        "Session cleared successfully"
    } else {
        "Session not found"
    };

    Json(SessionResponse {
        message: message.to_string(),
        session_id: id,
    })
}

async fn session_exists(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<SessionExistsResponse> {
    let exists = state.pipeline.sessions().exists(&id).await;
    Json(SessionExistsResponse {
        session_id: id,
        exists,
    })
}

async fn rag_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut session_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("session_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("Invalid session_id field: {}", e)))?;
                session_id = Some(value);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("document.pdf").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::validation(format!("Invalid file field: {}", e)))?;
                file = Some((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| Error::validation("Missing 'session_id' field"))?;
    let (file_name, bytes) = file.ok_or_else(|| Error::validation("Missing 'file' field"))?;

    // Indexing happens before the store is touched, so a failed upload
    // leaves any previously indexed document in place.
    let document = state.indexer.index(&file_name, &bytes).await?;
    let chunk_count = document.chunk_count;
    state.documents.insert(&session_id, document).await;

    Ok(Json(UploadResponse {
        message: "File uploaded and indexed successfully".to_string(),
        session_id,
        file_name,
        chunk_count,
    }))
}

async fn rag_query(
    State(state): State<AppState>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(Error::validation("message must not be empty").into());
    }

    let document = state
        .documents
        .get(&request.session_id)
        .await
        .ok_or_else(|| Error::NotFound("No document uploaded for this session".to_string()))?;

    let template = match request.prompt_file.as_deref() {
        Some(name) => {
            let path = prompt_path(&state.config.prompts.rag_dir, name)?;
            prompt::load_prompt(&path)?
        }
        None => PromptTemplate {
            template: DEFAULT_RAG_TEMPLATE.to_string(),
            input_variables: vec!["context".to_string(), "question".to_string()],
        },
    };

    let snippets = document.retriever.retrieve(&request.message).await?;
    let context = snippets.join("\n\n");
    let rendered = prompt::render_rag_prompt(&template, &context, &request.message)?;

    let model = request
        .model
        .unwrap_or_else(|| state.config.providers.default_model.clone());

    let provider = state
        .registry
        .get_for_model(&model)
        .ok_or_else(|| Error::validation(format!("unknown model: {}", model)))?;

    let tokens = provider
        .complete_stream(crate::provider::CompletionRequest {
            model,
            messages: vec![Message::user(rendered)],
            temperature: Some(
                request
                    .temperature
                    .unwrap_or(state.config.providers.default_temperature),
            ),
        })
        .await
        .map_err(Error::from)?;

    Ok(sse_from_events(forward_stream(tokens)))
}

async fn rag_prompts(State(state): State<AppState>) -> Result<Json<PromptsResponse>, ApiError> {
    let prompts = prompt::list_prompts(std::path::Path::new(&state.config.prompts.rag_dir))?;
    Ok(Json(PromptsResponse { prompts }))
}

async fn rag_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<DocumentResponse> {
    match state.documents.get(&id).await {
        Some(doc) => Json(DocumentResponse {
            session_id: id,
            exists: true,
            file_name: Some(doc.file_name),
            chunk_count: Some(doc.chunk_count),
            uploaded_at: Some(doc.uploaded_at.to_rfc3339()),
        }),
        None => Json(DocumentResponse {
            session_id: id,
            exists: false,
            file_name: None,
            chunk_count: None,
            uploaded_at: None,
        }),
    }
}
