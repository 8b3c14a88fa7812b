//! Page routes
//!
//! Server-rendered auth pages and the chat shell. Form posts run through
//! [`AuthForms`] and answer with either the re-rendered form or a redirect
//! carrying the new session cookies.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tera::Context as TeraContext;
use uuid::Uuid;

use crate::api::cookies::{error_page_target, RequestSession};
use crate::api::middleware::{ApiError, AppState, CurrentAccessToken, CurrentUser};
use crate::models::ChatMessage;
use crate::pages::PageVars;
use crate::services::auth_forms::{
    AuthForms, EmailForm, FormOutcome, NewPasswordForm, Notification, SignInForm,
};

const RESET_LINK_EXPIRED: &str = "Your password reset link has expired or is invalid";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/chat/{id}", get(chat_page))
        .route("/sign-in", get(sign_in_page).post(sign_in))
        .route("/sign-in/magic-link", post(magic_link))
        .route("/sign-up", get(sign_up_page).post(sign_up))
        .route("/signup", get(sign_up_page).post(sign_up))
        .route("/auth/oauth/{provider}", get(oauth_start))
        .route("/reset-password", get(reset_password_page).post(reset_password))
        .route("/update-password", get(update_password_page).post(update_password))
        .route("/sign-out", post(sign_out))
        .route("/error", get(error_page))
        .route("/auth-confirmation", get(auth_confirmation_page))
}

/// One-shot messages carried across a redirect
#[derive(Debug, Default, Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl NoticeQuery {
    fn apply(&self, vars: PageVars) -> PageVars {
        match (&self.error, &self.notice) {
            (Some(error), _) => vars.with_notification(Notification::error(error.clone())),
            (None, Some(notice)) => vars.with_notification(Notification::success(notice.clone())),
            (None, None) => vars,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    pub message: Option<String>,
}

/// Append a success notice to a redirect target
fn with_notice(target: &str, outcome: &FormOutcome) -> String {
    match &outcome.notification {
        Some(notification) if target.starts_with('/') => {
            let separator = if target.contains('?') { '&' } else { '?' };
            format!(
                "{}{}notice={}",
                target,
                separator,
                urlencoding::encode(&notification.message)
            )
        }
        _ => target.to_string(),
    }
}

fn render(state: &AppState, template: &str, vars: &PageVars, extra: &TeraContext) -> Html<String> {
    Html(state.pages.render_with_fallback(template, vars, extra))
}

/// Render `template` with the submitted email kept in the form
fn render_form(
    state: &AppState,
    session: &RequestSession,
    template: &str,
    path: &str,
    email: &str,
    outcome: &FormOutcome,
) -> Response {
    let mut extra = TeraContext::new();
    extra.insert("email", email);
    let vars = PageVars::new(path).with_outcome(outcome);
    session.apply(render(state, template, &vars, &extra).into_response())
}

/// Follow a successful outcome's redirect, or show the form again
fn finish_form(
    state: &AppState,
    session: &RequestSession,
    template: &str,
    path: &str,
    email: &str,
    outcome: FormOutcome,
) -> Response {
    match &outcome.redirect {
        Some(target) if outcome.is_success() => session.redirect(&with_notice(target, &outcome)),
        _ => render_form(state, session, template, path, email, &outcome),
    }
}

// ============================================================================
// Chat shell
// ============================================================================

/// GET /
async fn home(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(notice): Query<NoticeQuery>,
) -> Html<String> {
    let mut extra = TeraContext::new();
    extra.insert("chat_id", &Uuid::new_v4().to_string());
    extra.insert("messages", &Vec::<ChatMessage>::new());
    let vars = notice.apply(PageVars::new("/").with_user(Some(&user)));
    render(&state, "home.html", &vars, &extra)
}

/// GET /chat/{id}
async fn chat_page(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(CurrentAccessToken(access_token)): Extension<CurrentAccessToken>,
    Path(id): Path<String>,
) -> Response {
    let path = format!("/chat/{}", id);
    let vars = PageVars::new(path.as_str()).with_user(Some(&user));
    match state.chat_service.load_chat(&user, &access_token, &id).await {
        Ok(Some(chat)) => {
            let mut extra = TeraContext::new();
            extra.insert("chat_id", &chat.id);
            extra.insert("messages", &chat.messages);
            render(&state, "home.html", &vars, &extra).into_response()
        }
        Ok(None) => chat_error_page(&state, &vars, StatusCode::NOT_FOUND, "Chat not found"),
        Err(e) => {
            let error = ApiError::from(e);
            chat_error_page(&state, &vars, error.status, &error.message)
        }
    }
}

/// Chat error page answered with `status`
fn chat_error_page(state: &AppState, vars: &PageVars, status: StatusCode, message: &str) -> Response {
    let mut extra = TeraContext::new();
    extra.insert("heading", "Chat unavailable");
    extra.insert("message", message);
    (status, render(state, "error.html", vars, &extra)).into_response()
}

// ============================================================================
// Sign in / sign up
// ============================================================================

/// GET /sign-in
async fn sign_in_page(State(state): State<AppState>, headers: HeaderMap, Query(notice): Query<NoticeQuery>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    // Optimistic: a stale local session only costs one extra redirect
    if session.client().get_session().is_some() {
        return session.redirect("/");
    }
    let vars = notice.apply(PageVars::new("/sign-in"));
    render(&state, "sign_in.html", &vars, &TeraContext::new()).into_response()
}

/// POST /sign-in
async fn sign_in(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<SignInForm>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin)
        .sign_in_with_password(&form)
        .await;
    finish_form(&state, &session, "sign_in.html", "/sign-in", &form.email, outcome)
}

/// POST /sign-in/magic-link
async fn magic_link(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<EmailForm>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin).send_magic_link(&form).await;
    // The form is cleared either way
    render_form(&state, &session, "sign_in.html", "/sign-in", "", &outcome)
}

/// GET /sign-up
async fn sign_up_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    if session.client().get_session().is_some() {
        return session.redirect("/");
    }
    render(&state, "sign_up.html", &PageVars::new("/sign-up"), &TeraContext::new()).into_response()
}

/// POST /sign-up
async fn sign_up(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<NewPasswordForm>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin).sign_up(&form).await;
    finish_form(&state, &session, "sign_up.html", "/sign-up", &form.email, outcome)
}

/// GET /auth/oauth/{provider}
async fn oauth_start(State(state): State<AppState>, headers: HeaderMap, Path(provider): Path<String>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin).start_oauth(&provider);
    match (&outcome.redirect, &outcome.error) {
        (Some(url), None) => session.redirect(url),
        (_, error) => {
            let message = error.as_deref().unwrap_or("Authentication error");
            session.redirect(&error_page_target(message))
        }
    }
}

// ============================================================================
// Password reset
// ============================================================================

/// GET /reset-password
async fn reset_password_page(State(state): State<AppState>, Query(notice): Query<NoticeQuery>) -> Html<String> {
    let vars = notice.apply(PageVars::new("/reset-password"));
    render(&state, "reset_password.html", &vars, &TeraContext::new())
}

/// POST /reset-password
async fn reset_password(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<EmailForm>) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin)
        .request_password_reset(&form)
        .await;
    render_form(&state, &session, "reset_password.html", "/reset-password", &form.email, &outcome)
}

/// GET /update-password
async fn update_password_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let client = session.client();
    if !client.has_recovery_token() && client.get_session().is_none() {
        let target = format!("/reset-password?error={}", urlencoding::encode(RESET_LINK_EXPIRED));
        return session.redirect(&target);
    }
    render(&state, "update_password.html", &PageVars::new("/update-password"), &TeraContext::new()).into_response()
}

/// POST /update-password
async fn update_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<NewPasswordForm>,
) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    let origin = state.config.origin();
    let outcome = AuthForms::new(session.client(), &origin).update_password(&form).await;
    finish_form(&state, &session, "update_password.html", "/update-password", "", outcome)
}

// ============================================================================
// Sign out and status pages
// ============================================================================

/// POST /sign-out
///
/// Exempt from the auth gate, so an expired session is cleared without
/// being refreshed first.
async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = RequestSession::from_headers(&state, &headers);
    if let Err(e) = session.client().sign_out().await {
        tracing::error!("Error signing out: {}", e);
    }
    session.redirect("/sign-in")
}

/// GET /error
async fn error_page(State(state): State<AppState>, Query(query): Query<ErrorQuery>) -> Html<String> {
    let mut extra = TeraContext::new();
    if let Some(message) = query.message.filter(|m| !m.is_empty()) {
        extra.insert("message", &message);
    }
    render(&state, "error.html", &PageVars::new("/error"), &extra)
}

/// GET /auth-confirmation
async fn auth_confirmation_page(State(state): State<AppState>, Query(notice): Query<NoticeQuery>) -> Html<String> {
    let vars = notice.apply(PageVars::new("/auth-confirmation"));
    render(&state, "auth_confirmation.html", &vars, &TeraContext::new())
}
