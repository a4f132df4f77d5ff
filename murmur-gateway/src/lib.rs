//! Murmur Gateway - Sessioned chat over LLM providers, with document Q&A.
//!
//! This crate provides the HTTP service:
//! - Per-session conversation history (in-process, lazily created)
//! - Blocking and SSE-streaming chat completions
//! - YAML prompt templates with role-hint composition
//! - PDF upload, chunking, embedding, and retrieval-augmented queries
//!
//! ## Architecture
//!
//! ```text
//! Client → Gateway (resolve prompt → build messages → provider) → OpenAI
//!                         ↓
//!                  Record session turns
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod rag;
pub mod routes;
pub mod session;

pub use pipeline::{ChatCall, ChatPipeline, StreamEvent};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, OpenAiProvider, ProviderError,
    ProviderRegistry, TokenStream, create_registry,
};
pub use rag::{DocumentIndexer, DocumentStore, EmbeddingProvider, OpenAiEmbedding, Retriever};
pub use routes::AppState;
pub use session::{InMemorySessionStore, Role, SessionStore, Turn};

use axum::Router;
use murmur_common::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the gateway router with the default wiring: the OpenAI provider
/// registry, an in-process session store, and an OpenAI-backed indexer.
pub fn build_router(config: &Config) -> Router {
    let api_key = config.openai_api_key();

    let registry = Arc::new(create_registry(api_key));
    let sessions = Arc::new(InMemorySessionStore::new());
    let embedding = Arc::new(OpenAiEmbedding::new(
        api_key.unwrap_or_default(),
        config.rag.embedding_model.clone(),
    ));

    let state = AppState {
        pipeline: Arc::new(ChatPipeline::new(Arc::clone(&registry), sessions)),
        registry,
        documents: Arc::new(DocumentStore::new()),
        indexer: Arc::new(DocumentIndexer::new(
            embedding,
            config.rag.chunk_size,
            config.rag.chunk_overlap,
            config.rag.top_k,
        )),
        config: Arc::new(config.clone()),
    };

    build_router_with(state)
}

/// Build the gateway router from pre-wired state. Tests use this to inject
/// stub providers and stores.
pub fn build_router_with(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(state).layer(cors)
}

/// Start the gateway server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.gateway.host.parse::<std::net::IpAddr>()?,
        config.gateway.port,
    ));

    let router = build_router(config);

    tracing::info!("Starting Murmur Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
