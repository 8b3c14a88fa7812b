//! User model
//!
//! The identity record returned by the hosted auth provider. This crate only
//! ever reads it: no field is written back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account record a session resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Provider-assigned identifier (a UUID string)
    pub id: String,
    /// Primary email address
    #[serde(default)]
    pub email: Option<String>,
    /// Set once the email address has been confirmed
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    /// Linked sign-in identities (email, github, ...)
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the email address has been confirmed
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    /// Display label used by the page chrome
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// A sign-in identity linked to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    pub provider: String,
}
