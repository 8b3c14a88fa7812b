//! Chat persistence
//!
//! Finished transcripts are written to the hosted data store's `chats` table
//! as `{id, user_id, payload}` rows, one row per chat id.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::Chat;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store refused the caller's credentials or row policy
    #[error("Database access error: {0}")]
    Access(String),

    #[error("Database request failed: {0}")]
    Request(String),
}

impl StoreError {
    pub fn is_access_error(&self) -> bool {
        matches!(self, StoreError::Access(_))
    }
}

/// Persisted row shape
#[derive(Debug, Serialize)]
struct ChatRow<'a> {
    id: &'a str,
    user_id: &'a str,
    payload: &'a Chat,
}

/// Row as selected back
#[derive(Debug, Deserialize)]
struct PayloadRow {
    payload: Chat,
}

/// Where chats are kept
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert or replace the chat keyed by `chat.id`, acting as the user
    /// behind `access_token`
    async fn upsert_chat(&self, access_token: &str, chat: &Chat) -> Result<(), StoreError>;

    /// Chat stored under `id`, if the user behind `access_token` may see it
    async fn get_chat(&self, access_token: &str, id: &str) -> Result<Option<Chat>, StoreError>;
}

/// PostgREST-backed chat store
pub struct PostgrestChatStore {
    http: Client,
    table_url: Url,
    anon_key: SecretString,
}

impl PostgrestChatStore {
    /// `project_url` is the project root; rows go to `<project_url>/rest/v1/chats`
    pub fn new(http: Client, project_url: &Url, anon_key: SecretString) -> Result<Self, StoreError> {
        let table_url = project_url
            .join("rest/v1/chats")
            .map_err(|e| StoreError::Request(format!("bad project url: {}", e)))?;
        Ok(Self {
            http,
            table_url,
            anon_key,
        })
    }

    fn upsert_url(&self) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut().append_pair("on_conflict", "id");
        url
    }

    fn select_url(&self, id: &str) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id))
            .append_pair("select", "payload")
            .append_pair("limit", "1");
        url
    }
}

#[async_trait]
impl ChatStore for PostgrestChatStore {
    async fn upsert_chat(&self, access_token: &str, chat: &Chat) -> Result<(), StoreError> {
        let row = ChatRow {
            id: &chat.id,
            user_id: &chat.user_id,
            payload: chat,
        };

        let response = self
            .http
            .post(self.upsert_url())
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }

    async fn get_chat(&self, access_token: &str, id: &str) -> Result<Option<Chat>, StoreError> {
        let response = self
            .http
            .get(self.select_url(id))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let rows: Vec<PayloadRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Request(format!("invalid chat row: {}", e)))?;
        Ok(rows.into_iter().next().map(|row| row.payload))
    }
}

/// Map a failed store response. Auth failures and PostgREST error bodies
/// (those carrying a `code`) are access errors.
fn classify_failure(status: StatusCode, body: String) -> StoreError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return StoreError::Access(body);
    }
    let is_postgrest_error = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("code").cloned())
        .is_some();
    if is_postgrest_error {
        StoreError::Access(body)
    } else {
        StoreError::Request(format!("HTTP {}: {}", status.as_u16(), body))
    }
}
