//! API middleware
//!
//! Contains:
//! - Application state shared by every handler
//! - Plain-text API errors
//! - The auth gate run in front of every page

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::cookies::RequestSession;
use crate::config::AppConfig;
use crate::models::User;
use crate::pages::PageRenderer;
use crate::services::auth_provider::AuthProvider;
use crate::services::chat::ChatService;
use crate::services::session::log_auth_failure;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<dyn AuthProvider>,
    pub chat_service: Arc<ChatService>,
    pub pages: Arc<PageRenderer>,
}

/// User resolved by the auth gate
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Access token the gate validated, after any refresh
#[derive(Debug, Clone)]
pub struct CurrentAccessToken(pub String);

/// Plain-text error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn database_access() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Database access error")
    }

    pub fn internal_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

/// Path prefixes reachable without a session
const EXEMPT_PREFIXES: &[&str] = &[
    "/sign-in",
    "/sign-up",
    "/signup",
    "/share",
    "/api",
    "/_next/static",
    "/_next/image",
    "/static",
    "/favicon.ico",
    "/auth/",
    "/error",
    "/auth-confirmation",
    "/reset-password",
    "/update-password",
    "/sign-out",
];

/// Whether `path` skips the auth gate
pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Sign-in URL that brings the visitor back to `path` afterwards
pub fn sign_in_redirect_target(path: &str) -> String {
    format!("/sign-in?redirectedFrom={}", urlencoding::encode(path))
}

/// Auth gate middleware
///
/// Revalidates the session of every non-exempt request with the provider.
/// Anonymous visitors are sent to the sign-in page. Signed-in requests carry
/// [`CurrentUser`] with its [`CurrentAccessToken`], and the response carries
/// any rotated session cookies.
pub async fn auth_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt_path(&path) {
        return next.run(request).await;
    }

    let session = RequestSession::from_headers(&state, request.headers());
    match session.client().authenticate().await {
        Ok((current, user)) => {
            request.extensions_mut().insert(CurrentUser(user));
            request
                .extensions_mut()
                .insert(CurrentAccessToken(current.access_token));
            let response = next.run(request).await;
            session.apply(response)
        }
        Err(e) => {
            log_auth_failure(&e);
            tracing::debug!("Anonymous request to {}, redirecting to sign-in", path);
            session.redirect(&sign_in_redirect_target(&path))
        }
    }
}
