//! Per-request session plumbing
//!
//! Binds a [`SessionClient`] to the request's cookies and copies every
//! cookie write back onto the response.

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::middleware::AppState;
use crate::services::session::SessionClient;
use crate::services::session_storage::CookieStorage;

/// Session client for one request
pub struct RequestSession {
    client: SessionClient<CookieStorage>,
}

impl RequestSession {
    pub fn from_headers(state: &AppState, headers: &HeaderMap) -> Self {
        let storage = CookieStorage::from_headers(headers, state.config.cookie_secure);
        Self {
            client: SessionClient::new(state.auth.clone(), storage),
        }
    }

    pub fn client(&self) -> &SessionClient<CookieStorage> {
        &self.client
    }

    /// Append pending cookie writes to `response`
    pub fn apply(&self, mut response: Response) -> Response {
        self.client.storage().apply_to(response.headers_mut());
        response
    }

    /// `303 See Other` to `location`, carrying pending cookie writes
    pub fn redirect(&self, location: &str) -> Response {
        self.apply(see_other(location))
    }
}

/// Bare `303 See Other`
pub fn see_other(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::SEE_OTHER, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::warn!("Refusing to redirect to invalid location {:?}", location);
            (StatusCode::SEE_OTHER, [(header::LOCATION, HeaderValue::from_static("/"))]).into_response()
        }
    }
}

/// `/error?message=...`
pub fn error_page_target(message: &str) -> String {
    format!("/error?message={}", urlencoding::encode(message))
}

/// Honour `next` only when it is a same-origin absolute path
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => path,
        _ => "/",
    }
}
