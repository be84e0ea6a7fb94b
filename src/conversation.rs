//! Per-session conversation history.
//!
//! The LLM must see prior turns to resolve pronouns and follow-ups; unbounded
//! history would blow the token budget, so each session keeps a bounded ring
//! of messages with FIFO eviction.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationRole::User => write!(f, "user"),
            ConversationRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: ConversationRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Session-scoped conversation store with a fixed per-session capacity.
pub struct ConversationStore {
    max_messages: usize,
    sessions: RwLock<HashMap<String, VecDeque<ConversationMessage>>>,
}

impl ConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Append a message, evicting the oldest one past capacity.
    pub async fn add(&self, session_id: &str, role: ConversationRole, content: impl Into<String>) {
        if session_id.is_empty() {
            tracing::warn!("cannot add message: session id is empty");
            return;
        }
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push_back(ConversationMessage::new(role, content));
        while history.len() > self.max_messages {
            history.pop_front();
        }
    }

    /// Messages for a session, oldest first, optionally limited to the most
    /// recent `max`.
    pub async fn get(&self, session_id: &str, max: Option<usize>) -> Vec<ConversationMessage> {
        let sessions = self.sessions.read().await;
        let Some(history) = sessions.get(session_id) else {
            return Vec::new();
        };
        let skip = max
            .map(|m| history.len().saturating_sub(m))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }

    /// Conversation formatted for prompt injection. Empty sessions format to
    /// an empty string so callers can inject unconditionally.
    pub async fn formatted(&self, session_id: &str, max: Option<usize>) -> String {
        let history = self.get(session_id, max).await;
        if history.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Previous Conversation History:".to_string(), String::new()];
        for message in &history {
            let label = match message.role {
                ConversationRole::User => "User",
                ConversationRole::Assistant => "Assistant",
            };
            lines.push(format!("**{}:** {}", label, message.content));
            lines.push(String::new());
        }
        lines.push("---".to_string());
        lines.push(String::new());
        lines.join("\n")
    }

    /// Drop a session's history entirely.
    pub async fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(history) = sessions.remove(session_id) {
            tracing::info!(
                session_id,
                messages = history.len(),
                "cleared conversation session"
            );
        }
    }

    /// Number of sessions with at least one message.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Messages currently held for a session.
    pub async fn message_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// All session ids with history.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
