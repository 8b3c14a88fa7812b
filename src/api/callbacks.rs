//! Auth callback routes
//!
//! Landing targets of the auth provider's redirects:
//! - `GET /auth/callback` (and `/api/auth/callback`): OAuth and magic-link code exchange
//! - `GET /auth/confirm`: email confirmation and password recovery tokens
//!
//! Both always answer with a redirect.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::api::cookies::{error_page_target, safe_next, RequestSession};
use crate::api::middleware::AppState;
use crate::services::auth_errors::UNEXPECTED_ERROR;
use crate::services::auth_provider::{AuthError, OtpType};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub otp_type: Option<String>,
    pub next: Option<String>,
}

/// Provider message for the error page; transport trouble stays generic
fn error_message(error: &AuthError) -> String {
    if error.is_provider_reported() {
        error.message()
    } else {
        tracing::error!("Error in auth callback: {}", error);
        UNEXPECTED_ERROR.to_string()
    }
}

/// GET /auth/callback
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();

    let code = match (&query.error, query.code.as_deref()) {
        (None, Some(code)) if !code.is_empty() => code,
        _ => {
            let message = query
                .error_description
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or("Authentication error");
            tracing::warn!("Auth callback without code: {}", message);
            return session.redirect(&format!("{}{}", origin, error_page_target(message)));
        }
    };

    match session.client().exchange_code_for_session(code).await {
        Ok(_) => {
            let next = safe_next(query.next.as_deref());
            session.redirect(&format!("{}{}", origin, next))
        }
        Err(e) => session.redirect(&format!("{}{}", origin, error_page_target(&error_message(&e)))),
    }
}

/// GET /auth/confirm
pub async fn auth_confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();

    let (token_hash, raw_type) = match (query.token_hash.as_deref(), query.otp_type.as_deref()) {
        (Some(hash), Some(kind)) if !hash.is_empty() && !kind.is_empty() => (hash, kind),
        _ => {
            return session.redirect(&format!("{}{}", origin, error_page_target("Missing token or type")));
        }
    };

    let Some(otp_type) = OtpType::parse(raw_type) else {
        return session.redirect(&format!("{}{}", origin, error_page_target("Invalid token type")));
    };

    match session.client().verify_otp(token_hash, otp_type).await {
        // The recovery token is held apart and only opens the update form
        Ok(_) if otp_type == OtpType::Recovery => {
            session.redirect(&format!("{}/update-password", origin))
        }
        Ok(_) => {
            let next = safe_next(query.next.as_deref());
            session.redirect(&format!("{}{}", origin, next))
        }
        Err(e) => session.redirect(&format!("{}{}", origin, error_page_target(&error_message(&e)))),
    }
}
