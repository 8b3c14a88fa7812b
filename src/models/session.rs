//! Session model

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::User;

/// Seconds before the real expiry at which a token is already treated as expired
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Provider-issued token pair.
///
/// The cookie copy is authoritative for server decisions; an in-memory copy
/// is only a hint for optimistic UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Access token (JWT)
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Expiry as unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Lifetime in seconds, as reported by the provider
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// User attached by the provider, if any
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Build a session from a bare token pair (as read back from cookies)
    pub fn from_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
            expires_in: None,
            token_type: default_token_type(),
            user: None,
        }
    }

    /// Fill `expires_at` from `expires_in` when the provider only sent the latter
    pub fn normalized(mut self) -> Self {
        if self.expires_at.is_none() {
            if let Some(expires_in) = self.expires_in {
                self.expires_at = Some(Utc::now().timestamp() + expires_in);
            }
        }
        self
    }

    /// Check if the access token has expired.
    ///
    /// A session with no known expiry is never considered expired locally;
    /// the provider decides.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at - EXPIRY_MARGIN_SECS <= Utc::now().timestamp(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_fills_expires_at() {
        let mut session = Session::from_tokens("a", "r");
        session.expires_in = Some(3600);
        let session = session.normalized();
        let at = session.expires_at.unwrap();
        assert!(at > Utc::now().timestamp() + 3500);
        assert!(!session.is_expired());
    }

    #[test]
    fn test_is_expired() {
        let mut session = Session::from_tokens("a", "r");
        assert!(!session.is_expired());
        session.expires_at = Some(Utc::now().timestamp() - 1);
        assert!(session.is_expired());
        session.expires_at = Some(Utc::now().timestamp() + 5);
        assert!(session.is_expired(), "inside the margin counts as expired");
    }

    #[test]
    fn test_deserialize_token_response() {
        let json = r#"{
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1700000000,
            "refresh_token": "rt",
            "user": {"id": "u1", "email": "a@b.c"}
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.expires_at, Some(1_700_000_000));
        assert_eq!(session.user.unwrap().id, "u1");
    }
}
