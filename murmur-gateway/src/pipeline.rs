//! The chat pipeline: build-messages → invoke-provider → persist-turns.
//!
//! One pipeline value serves every session; it owns the provider registry
//! and the injected session store. Stages are plain sequential calls so
//! the order of effects (especially when turns are persisted) stays
//! visible in one place.

use crate::provider::{CompletionRequest, Message, ProviderRegistry, TokenStream};
use crate::session::{Role, SessionStore, Turn};
use futures_util::StreamExt;
use murmur_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One resolved chat invocation.
///
/// The system prompt arrives already composed; template resolution happens
/// at the request boundary.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub session_id: String,
    pub message: String,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: String,
}

/// Events delivered to a streaming consumer.
///
/// `Done` is the terminal marker, distinct from any data fragment. A
/// stream that fails mid-generation ends with `Error` and never `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Error(String),
    Done,
}

/// Chat pipeline over a provider registry and a session store.
pub struct ChatPipeline {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<dyn SessionStore>,
}

impl ChatPipeline {
    pub fn new(registry: Arc<ProviderRegistry>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { registry, sessions }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    fn validate(&self, call: &ChatCall) -> Result<Arc<dyn crate::provider::CompletionProvider>> {
        if call.message.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }

        self.registry
            .get_for_model(&call.model)
            .ok_or_else(|| Error::validation(format!("unknown model: {}", call.model)))
    }

    fn build_request(call: &ChatCall, history: &[Turn]) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&call.system_prompt));

        for turn in history {
            messages.push(Message {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            });
        }

        messages.push(Message::user(&call.message));

        CompletionRequest {
            model: call.model.clone(),
            messages,
            temperature: Some(call.temperature),
        }
    }

    /// One full completion.
    ///
    /// Turns are persisted only after the provider succeeds; a failed call
    /// leaves the session history untouched.
    pub async fn complete(&self, call: ChatCall) -> Result<String> {
        let provider = self.validate(&call)?;
        let history = self.sessions.get_history(&call.session_id).await;
        let request = Self::build_request(&call, &history);

        let response = provider.complete(request).await.map_err(Error::from)?;

        tracing::debug!(
            session_id = %call.session_id,
            model = %call.model,
            latency_ms = response.latency_ms,
            "Completion finished"
        );

        self.sessions
            .append(&call.session_id, Role::User, &call.message)
            .await;
        self.sessions
            .append(&call.session_id, Role::Assistant, &response.content)
            .await;

        Ok(response.content)
    }

    /// Streaming completion.
    ///
    /// The user turn is recorded as soon as the request is accepted, so a
    /// stream that later fails still leaves the question in history. The
    /// assistant turn is recorded once, with the full concatenation, only
    /// after a clean end of stream.
    pub async fn stream(&self, call: ChatCall) -> Result<mpsc::Receiver<StreamEvent>> {
        let provider = self.validate(&call)?;
        let history = self.sessions.get_history(&call.session_id).await;
        let request = Self::build_request(&call, &history);

        self.sessions
            .append(&call.session_id, Role::User, &call.message)
            .await;

        let mut tokens = provider.complete_stream(request).await.map_err(Error::from)?;

        let (tx, rx) = mpsc::channel(32);
        let sessions = Arc::clone(&self.sessions);
        let session_id = call.session_id.clone();

        tokio::spawn(async move {
            let mut full = String::new();

            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        full.push_str(&token);
                        if tx.send(StreamEvent::Token(token)).await.is_err() {
                            // Consumer stopped reading; abandon quietly.
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Stream failed");
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            sessions.append(&session_id, Role::Assistant, &full).await;
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

/// Forward a raw token stream as `StreamEvent`s without touching any
/// session state. Used by the RAG query path, which keeps no history.
pub fn forward_stream(mut tokens: TokenStream) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    if tx.send(StreamEvent::Token(token)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        CompletionProvider, CompletionResponse, ProviderError, ProviderRegistry,
    };
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;

    /// Deterministic provider emitting fixed fragments.
    struct StubProvider {
        fragments: Vec<String>,
        /// Fail after emitting this many fragments (streaming only).
        fail_after: Option<usize>,
        /// Fail before returning anything at all.
        fail_immediately: bool,
    }

    impl StubProvider {
        fn ok(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                fail_after: None,
                fail_immediately: false,
            }
        }

        fn failing_after(fragments: &[&str], n: usize) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                fail_after: Some(n),
                fail_immediately: false,
            }
        }

        fn broken() -> Self {
            Self {
                fragments: Vec::new(),
                fail_after: None,
                fail_immediately: true,
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn models(&self) -> Vec<&str> {
            vec!["stub-model"]
        }

        fn supports_model(&self, model: &str) -> bool {
            model == "stub-model"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            if self.fail_immediately {
                return Err(ProviderError::new("stub", &request.model, "provider down"));
            }

            Ok(CompletionResponse {
                model: request.model,
                content: self.fragments.concat(),
                latency_ms: 0,
            })
        }

        async fn complete_stream(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<TokenStream, ProviderError> {
            if self.fail_immediately {
                return Err(ProviderError::new("stub", &request.model, "provider down"));
            }

            let model = request.model;
            let mut items: Vec<std::result::Result<String, ProviderError>> = Vec::new();
            for (i, fragment) in self.fragments.iter().enumerate() {
                if self.fail_after == Some(i) {
                    break;
                }
                items.push(Ok(fragment.clone()));
            }
            if self.fail_after.is_some() {
                items.push(Err(ProviderError::new("stub", &model, "connection reset")));
            }

            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    fn pipeline_with(provider: StubProvider) -> ChatPipeline {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        ChatPipeline::new(
            Arc::new(registry),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    fn call(session_id: &str, message: &str) -> ChatCall {
        ChatCall {
            session_id: session_id.into(),
            message: message.into(),
            model: "stub-model".into(),
            temperature: 0.0,
            system_prompt: "You are helpful.".into(),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_complete_persists_turns_in_order() {
        let pipeline = pipeline_with(StubProvider::ok(&["Hello", " there"]));

        let answer = pipeline.complete(call("s1", "hi")).await.unwrap();
        assert_eq!(answer, "Hello there");

        let history = pipeline.sessions().get_history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Turn::new(Role::User, "hi"));
        assert_eq!(history[1], Turn::new(Role::Assistant, "Hello there"));
    }

    #[tokio::test]
    async fn test_streaming_round_trip_matches_complete() {
        let fragments = &["To", "ken", " by", " token"];

        let pipeline = pipeline_with(StubProvider::ok(fragments));
        let blocking = pipeline.complete(call("a", "hi")).await.unwrap();

        let pipeline = pipeline_with(StubProvider::ok(fragments));
        let events = drain(pipeline.stream(call("b", "hi")).await.unwrap()).await;

        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(streamed, blocking);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_stream_persists_user_eagerly_and_assistant_on_done() {
        let pipeline = pipeline_with(StubProvider::ok(&["fine, thanks"]));

        let events = drain(pipeline.stream(call("s1", "how are you")).await.unwrap()).await;
        assert_eq!(events.last(), Some(&StreamEvent::Done));

        let history = pipeline.sessions().get_history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Turn::new(Role::User, "how are you"));
        assert_eq!(history[1], Turn::new(Role::Assistant, "fine, thanks"));
    }

    #[tokio::test]
    async fn test_midstream_failure_two_tokens_then_error_no_done() {
        let pipeline = pipeline_with(StubProvider::failing_after(&["a", "b", "c"], 2));

        let events = drain(pipeline.stream(call("s1", "hi")).await.unwrap()).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Token("a".into()));
        assert_eq!(events[1], StreamEvent::Token("b".into()));
        assert!(matches!(events[2], StreamEvent::Error(_)));

        // Failed stream: the question is recorded, the partial answer is not.
        let history = pipeline.sessions().get_history("s1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_failed_completion_leaves_history_unchanged() {
        let pipeline = pipeline_with(StubProvider::broken());

        let err = pipeline.complete(call("s1", "hi")).await.unwrap_err();
        assert!(err.is_provider());
        assert!(pipeline.sessions().get_history("s1").await.is_empty());
        assert!(!pipeline.sessions().exists("s1").await);
    }

    #[tokio::test]
    async fn test_unknown_model_is_validation_error() {
        let pipeline = pipeline_with(StubProvider::ok(&["x"]));
        let mut bad = call("s1", "hi");
        bad.model = "no-such-model".into();

        let err = pipeline.complete(bad).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(pipeline.sessions().get_history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_validation_error() {
        let pipeline = pipeline_with(StubProvider::ok(&["x"]));

        let err = pipeline.complete(call("s1", "   ")).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_history_flows_into_request() {
        // The provider sees [system, history..., user]; verify through a
        // provider that echoes the message count.
        struct CountingProvider;

        #[async_trait]
        impl CompletionProvider for CountingProvider {
            fn name(&self) -> &str {
                "counting"
            }
            fn models(&self) -> Vec<&str> {
                vec!["stub-model"]
            }
            fn supports_model(&self, model: &str) -> bool {
                model == "stub-model"
            }
            async fn complete(
                &self,
                request: CompletionRequest,
            ) -> std::result::Result<CompletionResponse, ProviderError> {
                Ok(CompletionResponse {
                    model: request.model,
                    content: format!("{}", request.messages.len()),
                    latency_ms: 0,
                })
            }
            async fn complete_stream(
                &self,
                _request: CompletionRequest,
            ) -> std::result::Result<TokenStream, ProviderError> {
                unimplemented!("not exercised")
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CountingProvider));
        let pipeline = ChatPipeline::new(
            Arc::new(registry),
            Arc::new(InMemorySessionStore::new()),
        );

        // First call: system + user = 2 messages.
        let first = pipeline.complete(call("s1", "one")).await.unwrap();
        assert_eq!(first, "2");

        // Second call: system + 2 history turns + user = 4 messages.
        let second = pipeline.complete(call("s1", "two")).await.unwrap();
        assert_eq!(second, "4");
    }

    #[tokio::test]
    async fn test_forward_stream_terminates_with_done() {
        let tokens: TokenStream = Box::pin(futures_util::stream::iter(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
        ]));

        let events = drain(forward_stream(tokens)).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("a".into()),
                StreamEvent::Token("b".into()),
                StreamEvent::Done,
            ]
        );
    }
}
