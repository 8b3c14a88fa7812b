//! Chat model
//!
//! A chat is the full transcript of one conversation. It is rewritten whole
//! on every completed turn (upsert by `id`, last write wins).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of characters of the first message used as the title
pub const TITLE_MAX_CHARS: usize = 100;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Persisted chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub user_id: String,
    /// Creation time in unix milliseconds
    pub created_at: i64,
    pub path: String,
    pub messages: Vec<ChatMessage>,
}

impl Chat {
    /// Build the transcript for a finished turn.
    ///
    /// `messages` are the messages the client sent; `completion` is the full
    /// assistant reply, appended as the last entry.
    pub fn from_completion(
        id: impl Into<String>,
        user_id: impl Into<String>,
        mut messages: Vec<ChatMessage>,
        completion: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let title = derive_title(&messages);
        messages.push(ChatMessage::assistant(completion));
        Self {
            path: format!("/chat/{}", id),
            id,
            title,
            user_id: user_id.into(),
            created_at: Utc::now().timestamp_millis(),
            messages,
        }
    }
}

/// Title from the first message, cut at [`TITLE_MAX_CHARS`] characters
pub fn derive_title(messages: &[ChatMessage]) -> String {
    messages
        .first()
        .map(|m| m.content.chars().take(TITLE_MAX_CHARS).collect())
        .unwrap_or_default()
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub preview_token: Option<String>,
}
