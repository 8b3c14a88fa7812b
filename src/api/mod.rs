//! API layer - HTTP handlers and routing
//!
//! This module contains every HTTP endpoint of the chat front-end:
//! - Server-rendered pages (chat shell, sign in/up, password reset)
//! - Auth provider callbacks
//! - The streaming chat endpoint
//! - The auth gate run in front of all of them

pub mod callbacks;
pub mod chat;
pub mod cookies;
pub mod middleware;
pub mod pages;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, CurrentUser};

/// Build the auth callback and chat routes
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/auth/callback", get(callbacks::auth_callback))
        .route("/auth/callback", get(callbacks::auth_callback))
        .route("/auth/confirm", get(callbacks::auth_confirm))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => tracing::warn!("Invalid CORS origin {:?}, cross-origin requests disabled", cors_origin),
    }

    Router::new()
        .merge(pages::router())
        .merge(build_api_router())
        // Auth gate runs before every route; exempt paths short-circuit
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_gate,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
