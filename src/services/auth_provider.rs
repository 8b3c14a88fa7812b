//! Hosted auth provider client
//!
//! `AuthProvider` is the request/response contract of the hosted
//! authentication service. `GoTrueClient` implements it over the provider's
//! REST API (`<project>/auth/v1`). Nothing here keeps per-user state: tokens
//! are passed in and returned, storage is the session client's business.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::models::{Session, User};

/// Message the provider SDKs use for a missing local session
pub const SESSION_MISSING: &str = "Auth session missing!";

/// Errors returned by the auth provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No session is stored locally
    #[error("Auth session missing!")]
    SessionMissing,

    /// The provider answered with an error status
    #[error("{message}")]
    Provider { status: u16, message: String },

    /// An auth-code flow returned without the verifier it was started with
    #[error("PKCE code verifier not found in storage")]
    MissingCodeVerifier,

    /// The provider could not be reached
    #[error("Auth provider unreachable: {0}")]
    Transport(String),

    /// The provider answered with a body we could not read
    #[error("Invalid auth provider response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Provider-facing message, used for classification and translation
    pub fn message(&self) -> String {
        match self {
            AuthError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the failure came from the provider rather than the transport
    pub fn is_provider_reported(&self) -> bool {
        matches!(self, AuthError::Provider { .. } | AuthError::SessionMissing)
    }
}

/// Email OTP verification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    Email,
    Recovery,
}

impl OtpType {
    /// Parse the `type` query parameter; unknown types are rejected
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(OtpType::Email),
            "recovery" => Some(OtpType::Recovery),
            _ => None,
        }
    }
}

/// PKCE challenge sent when a flow will come back with an auth code
#[derive(Debug, Clone)]
pub struct CodeChallenge {
    pub challenge: String,
    pub method: &'static str,
}

/// Result of a sign-up call.
///
/// With auto-confirm enabled the provider returns a session straight away;
/// otherwise only the (unconfirmed) user.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub session: Option<Session>,
    pub user: Option<User>,
}

/// Contract of the hosted authentication service
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Revalidate an access token and return its user
    async fn get_user(&self, access_token: &str) -> Result<User, AuthError>;

    /// Password grant
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;

    /// Send a magic link / one-time password email
    async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: &str,
        challenge: Option<&CodeChallenge>,
    ) -> Result<(), AuthError>;

    /// URL the browser must visit to start an OAuth flow (no network call)
    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        challenge: Option<&CodeChallenge>,
    ) -> Result<Url, AuthError>;

    /// Create an account
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<SignUpResponse, AuthError>;

    /// Revoke the session behind an access token
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// Exchange a one-time auth code for a session
    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Session, AuthError>;

    /// Verify an email token hash
    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError>;

    /// Trade a refresh token for a new token pair
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// Send a password recovery email
    async fn reset_password_for_email(&self, email: &str, redirect_to: &str)
        -> Result<(), AuthError>;

    /// Set a new password for the user behind an access token
    async fn update_password(&self, access_token: &str, password: &str) -> Result<User, AuthError>;
}

/// REST client for a GoTrue-compatible auth API
pub struct GoTrueClient {
    http: Client,
    base_url: Url,
    anon_key: SecretString,
}

impl GoTrueClient {
    /// `project_url` is the project root; the client talks to `<project_url>/auth/v1`
    pub fn new(http: Client, project_url: &Url, anon_key: SecretString) -> Result<Self, AuthError> {
        let base_url = project_url
            .join("auth/v1/")
            .map_err(|e| AuthError::InvalidResponse(format!("bad project url: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            anon_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::InvalidResponse(format!("bad endpoint '{}': {}", path, e)))
    }

    /// Attach the public key, and the bearer token (user token or the public key)
    fn authorized(&self, builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let key = self.anon_key.expose_secret();
        builder
            .header("apikey", key)
            .bearer_auth(access_token.unwrap_or(key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, AuthError> {
        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Provider {
            status,
            message: provider_message(&body).unwrap_or_else(|| format!("HTTP {}", status)),
        })
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, AuthError> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, AuthError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let builder = self.authorized(self.http.post(url), None).json(&body);
        let session: Session = self.send_json(builder).await?;
        Ok(session.normalized())
    }
}

/// Pull a human-readable message out of a provider error body
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        let url = self.endpoint("user")?;
        let builder = self.authorized(self.http.get(url), Some(access_token));
        self.send_json(builder).await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        self.token_grant("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: &str,
        challenge: Option<&CodeChallenge>,
    ) -> Result<(), AuthError> {
        let mut url = self.endpoint("otp")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        let mut body = json!({ "email": email, "create_user": true });
        if let Some(c) = challenge {
            body["code_challenge"] = json!(c.challenge);
            body["code_challenge_method"] = json!(c.method);
        }
        let builder = self.authorized(self.http.post(url), None).json(&body);
        self.send(builder).await.map(|_| ())
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        challenge: Option<&CodeChallenge>,
    ) -> Result<Url, AuthError> {
        let mut url = self.endpoint("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            query.append_pair("redirect_to", redirect_to);
            if let Some(c) = challenge {
                query.append_pair("code_challenge", &c.challenge);
                query.append_pair("code_challenge_method", c.method);
            }
        }
        Ok(url)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<SignUpResponse, AuthError> {
        let mut url = self.endpoint("signup")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        let builder = self
            .authorized(self.http.post(url), None)
            .json(&json!({ "email": email, "password": password }));
        let value: Value = self.send_json(builder).await?;

        // Auto-confirm answers with a session, otherwise with the bare user
        if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)
                .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
            let user = session.user.clone();
            Ok(SignUpResponse {
                session: Some(session.normalized()),
                user,
            })
        } else {
            let user: User = serde_json::from_value(value)
                .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
            Ok(SignUpResponse {
                session: None,
                user: Some(user),
            })
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let url = self.endpoint("logout")?;
        let builder = self.authorized(self.http.post(url), Some(access_token));
        self.send(builder).await.map(|_| ())
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Session, AuthError> {
        self.token_grant(
            "pkce",
            json!({ "auth_code": code, "code_verifier": code_verifier }),
        )
        .await
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError> {
        let url = self.endpoint("verify")?;
        let builder = self
            .authorized(self.http.post(url), None)
            .json(&json!({ "token_hash": token_hash, "type": otp_type }));
        let session: Session = self.send_json(builder).await?;
        Ok(session.normalized())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), AuthError> {
        let mut url = self.endpoint("recover")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        let builder = self
            .authorized(self.http.post(url), None)
            .json(&json!({ "email": email }));
        self.send(builder).await.map(|_| ())
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<User, AuthError> {
        let url = self.endpoint("user")?;
        let builder = self
            .authorized(self.http.put(url), Some(access_token))
            .json(&json!({ "password": password }));
        self.send_json(builder).await
    }
}
