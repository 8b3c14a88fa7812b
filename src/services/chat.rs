//! Chat service
//!
//! Relays one chat turn to the completion API and persists the finished
//! transcript. Tokens are handed to the caller as they arrive; the chat row
//! is written once, after the last token.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Chat, ChatRequest, User};
use crate::services::chat_store::{ChatStore, StoreError};
use crate::services::completion::{CompletionCredential, CompletionError, CompletionProvider};

/// Chat errors raised before the first byte is streamed, or while loading
/// a stored chat
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stream of assistant text
pub type ChatStream = std::pin::Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Chat service
pub struct ChatService {
    completion: Arc<dyn CompletionProvider>,
    store: Arc<dyn ChatStore>,
}

impl ChatService {
    pub fn new(completion: Arc<dyn CompletionProvider>, store: Arc<dyn ChatStore>) -> Self {
        Self { completion, store }
    }

    /// Check a request before anything is sent upstream
    pub fn validate(request: &ChatRequest) -> Result<(), ChatError> {
        if request.messages.is_empty() {
            return Err(ChatError::InvalidRequest("messages must not be empty".to_string()));
        }
        Ok(())
    }

    /// Start a chat turn for `user`.
    ///
    /// The returned stream yields the assistant text. When it ends normally
    /// the chat is upserted with `access_token`; a broken upstream ends the
    /// stream with an error and nothing is saved.
    pub async fn stream_reply(
        &self,
        user: &User,
        access_token: String,
        request: ChatRequest,
    ) -> Result<ChatStream, ChatError> {
        Self::validate(&request)?;

        let credential = CompletionCredential::from_preview_token(request.preview_token.as_deref());
        let mut upstream = self
            .completion
            .stream_chat(&request.messages, credential)
            .await?;

        let store = self.store.clone();
        let user_id = user.id.clone();
        let chat_id = request
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let messages = request.messages;

        let stream = async_stream::stream! {
            let mut completion = String::new();
            let mut broken = false;
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(text) => {
                        completion.push_str(&text);
                        yield Ok(text);
                    }
                    Err(e) => {
                        tracing::error!("Completion stream for chat {} broke: {}", chat_id, e);
                        yield Err(e);
                        broken = true;
                        break;
                    }
                }
            }

            if !broken {
                let chat = Chat::from_completion(chat_id, user_id, messages, completion);
                match save_chat(store.as_ref(), &access_token, &chat).await {
                    Err(e) if e.is_access_error() => {
                        tracing::error!("Chat store refused chat {}: {}", chat.id, e)
                    }
                    Err(e) => tracing::error!("Failed to save chat {}: {}", chat.id, e),
                    Ok(()) => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Stored chat `id` of `user`. Rows of other users read as missing.
    pub async fn load_chat(&self, user: &User, access_token: &str, id: &str) -> Result<Option<Chat>, ChatError> {
        let chat = self.store.get_chat(access_token, id).await?;
        Ok(chat.filter(|c| c.user_id == user.id))
    }
}

/// Upsert a finished chat.
///
/// Runs after the reply has been streamed, so failures can only be logged.
pub async fn save_chat(store: &dyn ChatStore, access_token: &str, chat: &Chat) -> Result<(), StoreError> {
    store.upsert_chat(access_token, chat).await?;
    tracing::debug!("Saved chat {} ({} messages)", chat.id, chat.messages.len());
    Ok(())
}
