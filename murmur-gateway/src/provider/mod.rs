//! Completion provider abstraction.
//!
//! Providers expose a unified blocking and streaming completion interface;
//! the registry maps model identifiers to providers and doubles as the
//! model allow-list for incoming requests.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy sequence of response fragments from a streaming completion.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Unified interface for completion providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Models this provider serves.
    fn models(&self) -> Vec<&str>;

    /// Whether this provider can serve the given model.
    fn supports_model(&self, model: &str) -> bool;

    /// One full completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Streaming completion. Fragments arrive in emission order; the
    /// concatenation of all fragments equals what `complete` would return
    /// for the same request against a deterministic model.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(provider: &str, model: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for murmur_common::Error {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err.to_string())
    }
}

/// A message in the conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Unified completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Ordered message sequence, system message first
    pub messages: Vec<Message>,
    /// Generation temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Unified completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Model that produced the response
    pub model: String,
    /// Full response text
    pub content: String,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Registry of available providers.
///
/// Also serves as the model allow-list: a model that no registered
/// provider claims is rejected at the request boundary.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CompletionProvider>>,
    model_to_provider: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider and map its models.
    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        let name = provider.name().to_string();

        for model in provider.models() {
            self.model_to_provider.insert(model.to_string(), name.clone());
        }

        self.providers.insert(name, provider);
    }

    /// Get the provider serving a model.
    pub fn get_for_model(&self, model: &str) -> Option<Arc<dyn CompletionProvider>> {
        if let Some(name) = self.model_to_provider.get(model) {
            return self.providers.get(name).cloned();
        }

        self.providers
            .values()
            .find(|p| p.supports_model(model))
            .cloned()
    }

    /// All models served by registered providers.
    pub fn list_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.model_to_provider.keys().cloned().collect();
        models.sort();
        models
    }
}

/// Create a registry with the configured providers.
pub fn create_registry(openai_api_key: Option<&str>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if let Some(key) = openai_api_key {
        if !key.is_empty() {
            registry.register(Arc::new(OpenAiProvider::new(key)));
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_rejects_models() {
        let registry = ProviderRegistry::new();
        assert!(registry.get_for_model("gpt-4o").is_none());
        assert!(registry.list_models().is_empty());
    }

    #[test]
    fn test_registry_maps_models() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiProvider::new("test-key")));

        assert!(registry.get_for_model("gpt-4o").is_some());
        assert!(registry.get_for_model("gpt-5-mini").is_some());
        assert!(registry.get_for_model("claude-sonnet-4").is_none());
        assert!(registry.list_models().contains(&"gpt-4.1".to_string()));
    }

    #[test]
    fn test_create_registry_skips_empty_key() {
        let registry = create_registry(Some(""));
        assert!(registry.list_models().is_empty());

        let registry = create_registry(None);
        assert!(registry.list_models().is_empty());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new("openai", "gpt-4o", "connection refused").with_status(502);
        assert_eq!(err.to_string(), "[openai:gpt-4o] connection refused");
        assert_eq!(err.status_code, Some(502));
    }

    #[test]
    fn test_completion_request_serialization() {
        let request = CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::system("You are helpful."), Message::user("Hello")],
            temperature: Some(0.0),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gpt-4o"));
        assert!(json.contains("You are helpful."));
        assert!(json.contains("\"role\":\"user\""));
    }
}
