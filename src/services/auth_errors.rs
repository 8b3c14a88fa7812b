//! Auth error classification and user-facing translation
//!
//! The provider reports failures as free-text messages, not stable codes, so
//! both tables below match by substring. If the provider rewords a message
//! the translation silently falls back to passing it through verbatim.

/// Messages that describe a routine anonymous state rather than a failure.
pub const EXPECTED_AUTH_ERRORS: &[&str] = &[
    "Auth session missing!",
    "Invalid JWT",
    "JWT expired",
    "User not found",
    "Session not found",
];

/// Message shown when the failure is not something the user can act on
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

/// Provider phrase -> user-facing text
const SIGN_IN_TRANSLATIONS: &[(&str, &str)] = &[
    (
        "Invalid login credentials",
        "Incorrect email or password. Please try again.",
    ),
    (
        "Email not confirmed",
        "Please verify your email address before signing in.",
    ),
    (
        "already registered",
        "This email is already registered. Try signing in instead.",
    ),
];

/// Whether a provider message means "no usable session" (suppressed from error logs)
pub fn is_expected_auth_error(message: &str) -> bool {
    EXPECTED_AUTH_ERRORS.iter().any(|m| message.contains(m))
}

/// Translate a provider message into friendlier text; unknown messages pass through
pub fn translate_auth_error(message: &str) -> String {
    SIGN_IN_TRANSLATIONS
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, friendly)| friendly.to_string())
        .unwrap_or_else(|| message.to_string())
}
