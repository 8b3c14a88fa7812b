//! Session client
//!
//! Uniform session contract over the auth provider:
//! - `get_user()` revalidates with the provider and is the only check that may
//!   gate access to protected resources
//! - `get_session()` reads the local, possibly stale copy for optimistic UI
//! - `sign_in_*`, `sign_up`, `sign_out`, code/token exchange and password
//!   operations, each persisting the resulting session through the storage
//!   backend and announcing it on the auth-state channel

use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use crate::models::{Session, User};
use crate::services::auth_errors::is_expected_auth_error;
use crate::services::auth_provider::{AuthError, AuthProvider, CodeChallenge, OtpType};
use crate::services::session_storage::SessionStorage;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "sb-access-token";
/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "sb-refresh-token";
/// Storage key of the access token expiry (unix seconds)
pub const EXPIRES_AT_KEY: &str = "sb-expires-at";
/// Storage key of the cached user record
pub const USER_KEY: &str = "sb-user";
/// Storage key of the PKCE verifier of an in-flight auth-code flow
pub const CODE_VERIFIER_KEY: &str = "sb-code-verifier";
/// Storage key of a password-recovery access token. Kept apart from the
/// session keys so it never passes the auth gate.
pub const RECOVERY_TOKEN_KEY: &str = "sb-recovery-token";

const EVENT_CAPACITY: usize = 16;

/// Kind of auth-state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Auth-state change notification, carrying the session after the change
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

/// Detachable handle on the auth-state channel.
///
/// Dropping the handle (or calling [`AuthSubscription::unsubscribe`])
/// detaches it; no event is delivered afterwards.
pub struct AuthSubscription {
    receiver: Option<broadcast::Receiver<AuthEvent>>,
}

impl AuthSubscription {
    /// Wait for the next event. Returns `None` once detached or when the
    /// client is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth state listener lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Detach from the channel
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}

/// What a sign-up attempt produced
#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    /// Auto-confirm is on: the user is signed in
    SignedIn(Session),
    /// A confirmation email was sent
    ConfirmationSent,
    /// The email already belongs to an account
    AlreadyRegistered,
}

/// Session client bound to one storage backend
pub struct SessionClient<S: SessionStorage> {
    provider: Arc<dyn AuthProvider>,
    storage: S,
    events: broadcast::Sender<AuthEvent>,
}

impl<S: SessionStorage> SessionClient<S> {
    pub fn new(provider: Arc<dyn AuthProvider>, storage: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            storage,
            events,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Subscribe to auth-state changes
    pub fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription {
            receiver: Some(self.events.subscribe()),
        }
    }

    /// Locally stored session, possibly stale. Never use it to authorize.
    pub fn get_session(&self) -> Option<Session> {
        let access_token = self.storage.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.storage.get(REFRESH_TOKEN_KEY).unwrap_or_default();
        let mut session = Session::from_tokens(access_token, refresh_token);
        session.expires_at = self
            .storage
            .get(EXPIRES_AT_KEY)
            .and_then(|v| v.parse::<i64>().ok());
        session.user = self
            .storage
            .get(USER_KEY)
            .and_then(|v| serde_json::from_str::<User>(&v).ok());
        Some(session)
    }

    /// User behind the stored session, revalidated with the provider.
    ///
    /// Never fails: a missing or rejected session and an unreachable provider
    /// all come back as `None`. Only unexpected failures are logged above
    /// debug level.
    pub async fn get_user(&self) -> Option<User> {
        match self.authenticate().await {
            Ok((_, user)) => Some(user),
            Err(e) => {
                log_auth_failure(&e);
                None
            }
        }
    }

    /// Revalidated session and user, refreshing an expired access token first
    pub async fn authenticate(&self) -> Result<(Session, User), AuthError> {
        let session = self.current_session().await?;
        let user = self.provider.get_user(&session.access_token).await?;
        Ok((session, user))
    }

    async fn current_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::SessionMissing)?;
        if !session.is_expired() {
            return Ok(session);
        }
        if session.refresh_token.is_empty() {
            self.clear_session();
            return Err(AuthError::SessionMissing);
        }

        match self.provider.refresh_session(&session.refresh_token).await {
            Ok(fresh) => {
                self.save_session(&fresh);
                self.emit(AuthEventKind::TokenRefreshed, Some(fresh.clone()));
                Ok(fresh)
            }
            Err(e) => {
                // A rejected refresh token cannot recover; drop the stale pair
                if matches!(e, AuthError::Provider { .. }) {
                    self.clear_session();
                    self.emit(AuthEventKind::SignedOut, None);
                }
                Err(e)
            }
        }
    }

    /// Password sign-in
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        self.save_session(&session);
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Send a magic link; the link comes back to `redirect_to` with an auth code
    pub async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let challenge = self.start_code_flow();
        self.provider
            .sign_in_with_otp(email, redirect_to, Some(&challenge))
            .await
    }

    /// URL to send the browser to for an OAuth sign-in
    pub fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<Url, AuthError> {
        let challenge = self.start_code_flow();
        self.provider
            .authorize_url(provider, redirect_to, Some(&challenge))
    }

    /// Create an account
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let response = self.provider.sign_up(email, password, redirect_to).await?;

        if let Some(session) = response.session {
            self.save_session(&session);
            self.emit(AuthEventKind::SignedIn, Some(session.clone()));
            return Ok(SignUpOutcome::SignedIn(session));
        }

        match response.user {
            // The provider hides existing accounts behind a user with no identities
            Some(user) if user.identities.is_empty() => Ok(SignUpOutcome::AlreadyRegistered),
            Some(_) => Ok(SignUpOutcome::ConfirmationSent),
            None => Err(AuthError::InvalidResponse(
                "sign-up returned neither a session nor a user".to_string(),
            )),
        }
    }

    /// Revoke the session remotely and forget it locally.
    ///
    /// Local state is cleared even when the provider call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = match self.get_session() {
            Some(session) => self.provider.sign_out(&session.access_token).await,
            None => Ok(()),
        };
        self.clear_session();
        self.emit(AuthEventKind::SignedOut, None);

        match result {
            Err(e) if !is_expected_auth_error(&e.message()) => Err(e),
            _ => Ok(()),
        }
    }

    /// Finish an auth-code flow started by `sign_in_with_otp`/`sign_in_with_oauth`
    pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session, AuthError> {
        let verifier = self
            .storage
            .get(CODE_VERIFIER_KEY)
            .ok_or(AuthError::MissingCodeVerifier)?;
        let session = self.provider.exchange_code_for_session(code, &verifier).await?;
        self.storage.remove(CODE_VERIFIER_KEY);
        self.save_session(&session);
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Verify an email token.
    ///
    /// An email token signs the user in. A recovery token is only kept
    /// under [`RECOVERY_TOKEN_KEY`], where nothing but
    /// [`SessionClient::update_password`] reads it.
    pub async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError> {
        let session = self.provider.verify_otp(token_hash, otp_type).await?;
        match otp_type {
            OtpType::Email => {
                self.save_session(&session);
                self.emit(AuthEventKind::SignedIn, Some(session.clone()));
            }
            OtpType::Recovery => {
                self.storage.set(RECOVERY_TOKEN_KEY, &session.access_token);
                self.emit(AuthEventKind::PasswordRecovery, Some(session.clone()));
            }
        }
        Ok(session)
    }

    /// Whether a verified recovery token is waiting for a new password
    pub fn has_recovery_token(&self) -> bool {
        self.storage
            .get(RECOVERY_TOKEN_KEY)
            .is_some_and(|token| !token.is_empty())
    }

    /// Send a password recovery email
    pub async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), AuthError> {
        self.provider.reset_password_for_email(email, redirect_to).await
    }

    /// Set a new password.
    ///
    /// A pending recovery token takes precedence over the signed-in session
    /// and is spent by a successful update.
    pub async fn update_password(&self, password: &str) -> Result<User, AuthError> {
        if let Some(token) = self.storage.get(RECOVERY_TOKEN_KEY).filter(|t| !t.is_empty()) {
            let user = self.provider.update_password(&token, password).await?;
            self.storage.remove(RECOVERY_TOKEN_KEY);
            if let Err(e) = self.provider.sign_out(&token).await {
                log_auth_failure(&e);
            }
            self.emit(AuthEventKind::UserUpdated, None);
            return Ok(user);
        }

        let session = self.current_session().await?;
        let user = self
            .provider
            .update_password(&session.access_token, password)
            .await?;
        if let Ok(json) = serde_json::to_string(&user) {
            self.storage.set(USER_KEY, &json);
        }
        let mut updated = session;
        updated.user = Some(user.clone());
        self.emit(AuthEventKind::UserUpdated, Some(updated));
        Ok(user)
    }

    fn start_code_flow(&self) -> CodeChallenge {
        let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.storage.set(CODE_VERIFIER_KEY, &verifier);
        CodeChallenge {
            challenge: verifier,
            method: "plain",
        }
    }

    fn save_session(&self, session: &Session) {
        self.storage.set(ACCESS_TOKEN_KEY, &session.access_token);
        self.storage.set(REFRESH_TOKEN_KEY, &session.refresh_token);
        match session.expires_at {
            Some(at) => self.storage.set(EXPIRES_AT_KEY, &at.to_string()),
            None => self.storage.remove(EXPIRES_AT_KEY),
        }
        match session.user.as_ref().and_then(|u| serde_json::to_string(u).ok()) {
            Some(json) => self.storage.set(USER_KEY, &json),
            None => self.storage.remove(USER_KEY),
        }
    }

    fn clear_session(&self) {
        for key in [
            ACCESS_TOKEN_KEY,
            REFRESH_TOKEN_KEY,
            EXPIRES_AT_KEY,
            USER_KEY,
            RECOVERY_TOKEN_KEY,
        ] {
            self.storage.remove(key);
        }
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No subscriber is fine
        let _ = self.events.send(AuthEvent { kind, session });
    }
}

/// Log an auth failure unless it is a routine "not signed in" state
pub fn log_auth_failure(error: &AuthError) {
    let message = error.message();
    if is_expected_auth_error(&message) {
        tracing::debug!("No authenticated user: {}", message);
    } else {
        tracing::warn!("Auth error: {}", message);
    }
}
