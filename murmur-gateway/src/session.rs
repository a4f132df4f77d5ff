//! Per-session conversation history.
//!
//! Sessions are keyed by an opaque string id and created lazily: the first
//! reference to an unknown id behaves like an empty session. History is
//! append-only and lives for the process lifetime; there is no eviction
//! and no persistence, by design.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Role of one history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire-format name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message unit within a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Storage interface for session histories.
///
/// The gateway only depends on this trait, so the in-process map below can
/// be swapped for a keyed cache or an external store without touching the
/// chat pipeline.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Ordered history for a session. Empty for ids never seen.
    async fn get_history(&self, id: &str) -> Vec<Turn>;

    /// Append a turn, creating the session if absent.
    async fn append(&self, id: &str, role: Role, content: &str);

    /// Empty a session's history, keeping the entry.
    ///
    /// Returns true if the session existed. Clearing an unknown id returns
    /// false and creates nothing.
    async fn clear(&self, id: &str) -> bool;

    /// Whether the store currently has an entry for this id.
    async fn exists(&self, id: &str) -> bool;
}

/// Process-local session store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_history(&self, id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, id: &str, role: Role, content: &str) {
        self.sessions
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .push(Turn::new(role, content));
    }

    async fn clear(&self, id: &str) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(history) => {
                history.clear();
                true
            }
            None => false,
        }
    }

    async fn exists(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unseen_session_is_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.get_history("never-seen").await.is_empty());
        assert!(!store.exists("never-seen").await);
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemorySessionStore::new();
        store.append("s1", Role::User, "hi").await;
        store.append("s1", Role::Assistant, "hello").await;
        store.append("s1", Role::User, "how are you").await;

        let history = store.get_history("s1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Turn::new(Role::User, "hi"));
        assert_eq!(history[1], Turn::new(Role::Assistant, "hello"));
        assert_eq!(history[2], Turn::new(Role::User, "how are you"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store.append("a", Role::User, "for a").await;
        store.append("b", Role::User, "for b").await;
        store.append("a", Role::Assistant, "reply to a").await;

        assert_eq!(store.get_history("a").await.len(), 2);
        assert_eq!(store.get_history("b").await.len(), 1);
        assert_eq!(store.get_history("b").await[0].content, "for b");
    }

    #[tokio::test]
    async fn test_clear_existing_session() {
        let store = InMemorySessionStore::new();
        store.append("s1", Role::User, "hi").await;

        assert!(store.clear("s1").await);
        assert!(store.get_history("s1").await.is_empty());
        // The entry survives a clear; only the history is emptied.
        assert!(store.exists("s1").await);
    }

    #[tokio::test]
    async fn test_clear_unknown_session_creates_nothing() {
        let store = InMemorySessionStore::new();
        assert!(!store.clear("ghost").await);
        assert!(!store.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_single_turn_scenario() {
        let store = InMemorySessionStore::new();
        store.append("s1", Role::User, "hi").await;
        let history = store.get_history("s1").await;
        assert_eq!(history, vec![Turn::new(Role::User, "hi")]);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(Role::User.as_str(), "user");
    }
}
