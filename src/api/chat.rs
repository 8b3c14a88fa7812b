//! Chat API endpoint
//!
//! `POST /api/chat` relays a chat turn to the completion API and streams the
//! assistant text back as `text/plain`.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::cookies::RequestSession;
use crate::api::middleware::{ApiError, AppState};
use crate::models::ChatRequest;
use crate::services::chat::ChatError;
use crate::services::completion::CompletionError;

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Unauthorized => ApiError::unauthorized(),
            ChatError::InvalidRequest(message) => ApiError::bad_request(message),
            ChatError::Store(store) if store.is_access_error() => {
                tracing::error!("Chat store access error: {}", store);
                ApiError::database_access()
            }
            ChatError::Store(store) => {
                tracing::error!("Chat store error: {}", store);
                ApiError::internal_error()
            }
            ChatError::Completion(CompletionError::Rejected { status, message }) => {
                tracing::error!("Completion API rejected the request ({}): {}", status, message);
                ApiError::internal_error()
            }
            ChatError::Completion(other) => {
                tracing::error!("Chat API error: {}", other);
                ApiError::internal_error()
            }
        }
    }
}

/// POST /api/chat
pub async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let result = stream_chat(&state, &session, &body).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => ApiError::from(e).into_response(),
    };
    session.apply(response)
}

async fn stream_chat(state: &AppState, session: &RequestSession, body: &[u8]) -> Result<Response, ChatError> {
    let (current, user) = session
        .client()
        .authenticate()
        .await
        .map_err(|e| {
            crate::services::session::log_auth_failure(&e);
            ChatError::Unauthorized
        })?;

    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| ChatError::InvalidRequest(format!("Invalid request body: {}", e)))?;

    tracing::info!("Chat turn for user {} ({} messages)", user.id, request.messages.len());
    let stream = state
        .chat_service
        .stream_reply(&user, current.access_token, request)
        .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{session_cookie, TestApp};
    use crate::services::testing::{CompletionBehavior, FakeCompletion};
    use axum::http::{header, HeaderValue, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_anonymous_chat_is_unauthorized() {
        let app = TestApp::new();
        let response = app
            .server
            .post("/api/chat")
            .json(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), "Unauthorized");
        assert_eq!(app.completion.call_count(), 0);
        assert_eq!(app.store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_revoked_session_is_unauthorized() {
        let app = TestApp::new();
        let session = app.signed_in_session();
        app.auth.revoke(&session.access_token);

        let response = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .json(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(app.store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_streams_reply_and_saves_transcript() {
        let app = TestApp::new();
        let session = app.signed_in_session();

        let response = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .json(&json!({ "id": "c1", "messages": [{ "role": "user", "content": "Hi" }] }))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("text/plain; charset=utf-8")
        );
        assert_eq!(response.text(), "Hello there");

        let chat = app.store.get("c1").unwrap();
        assert_eq!(chat.title, "Hi");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].content, "Hello there");
        assert_eq!(chat.user_id, session.user.as_ref().unwrap().id);
        assert_eq!(app.store.tokens(), vec![session.access_token.clone()]);
    }

    #[tokio::test]
    async fn test_repeated_turns_upsert_same_row() {
        let app = TestApp::new();
        let session = app.signed_in_session();

        for messages in [
            json!([{ "role": "user", "content": "Hi" }]),
            json!([
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello there" },
                { "role": "user", "content": "How are you?" }
            ]),
        ] {
            app.server
                .post("/api/chat")
                .add_header(header::COOKIE, session_cookie(&session))
                .json(&json!({ "id": "c1", "messages": messages }))
                .await
                .assert_status_ok();
        }

        assert_eq!(app.store.len(), 1);
        assert_eq!(app.store.get("c1").unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = TestApp::new();
        let session = app.signed_in_session();

        let response = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .text("{not json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let empty = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .json(&json!({ "messages": [] }))
            .await;
        empty.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(app.completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_internal_error() {
        let app = TestApp::with_completion(FakeCompletion::new(CompletionBehavior::Reject));
        let session = app.signed_in_session();

        let response = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .json(&json!({ "messages": [{ "role": "user", "content": "Hi" }] }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "Internal server error");
        assert_eq!(app.store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_store_denial_still_streams() {
        let app = TestApp::new();
        app.store.deny_access();
        let session = app.signed_in_session();

        let response = app
            .server
            .post("/api/chat")
            .add_header(header::COOKIE, session_cookie(&session))
            .json(&json!({ "id": "c1", "messages": [{ "role": "user", "content": "Hi" }] }))
            .await;

        response.assert_status_ok();
        assert_eq!(response.text(), "Hello there");
        assert!(app.store.get("c1").is_none());
    }
}
