//! Auth form handlers
//!
//! One handler per form (sign-in, sign-up, magic link, OAuth, password
//! reset, password update). Each one:
//! - validates locally before the provider is contacted
//! - reports failures as an inline error plus an error notification
//! - reports success as a navigation target and/or success notification
//! - keeps [`FormState::loading`] set for exactly the duration of the attempt

use tokio::sync::watch;

use crate::services::auth_errors::{translate_auth_error, UNEXPECTED_ERROR};
use crate::services::auth_provider::AuthError;
use crate::services::session::{SessionClient, SignUpOutcome};
use crate::services::session_storage::SessionStorage;

/// Minimum password length for new passwords
pub const MIN_PASSWORD_LEN: usize = 8;

/// Local validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("Please fill in all fields")]
    EmptyFields,

    #[error("Passwords don't match")]
    PasswordMismatch,

    #[error("Password must be at least 8 characters")]
    PasswordTooShort,
}

/// Check a new password and its confirmation
pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), FormError> {
    if password.is_empty() || confirm.is_empty() {
        return Err(FormError::EmptyFields);
    }
    if password != confirm {
        return Err(FormError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FormError::PasswordTooShort);
    }
    Ok(())
}

/// Friendly text for a sign-in failure
pub fn translate_sign_in_error(message: &str) -> String {
    translate_auth_error(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Transient message shown after a form submission
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }
}

/// What a submission produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormOutcome {
    /// Inline error under the form
    pub error: Option<String>,
    pub notification: Option<Notification>,
    /// Where to navigate next
    pub redirect: Option<String>,
}

impl FormOutcome {
    fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            notification: Some(Notification::error(message.clone())),
            error: Some(message),
            redirect: None,
        }
    }

    fn succeeded(notification: Option<&str>, redirect: Option<&str>) -> Self {
        Self {
            error: None,
            notification: notification.map(Notification::success),
            redirect: redirect.map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Observable form state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    pub loading: bool,
    pub error: Option<String>,
}

/// Publishes [`FormState`] for one form
pub struct FormTracker {
    sender: watch::Sender<FormState>,
}

impl Default for FormTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FormTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(FormState::default());
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<FormState> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> FormState {
        self.sender.borrow().clone()
    }

    /// Set loading and clear the previous error until the guard drops
    fn begin(&self) -> LoadingGuard<'_> {
        self.sender.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        LoadingGuard { tracker: self }
    }

    fn finish(&self, outcome: FormOutcome) -> FormOutcome {
        let error = outcome.error.clone();
        self.sender.send_modify(|s| s.error = error);
        outcome
    }
}

/// Clears `loading` however the attempt ends
struct LoadingGuard<'a> {
    tracker: &'a FormTracker,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.sender.send_modify(|s| s.loading = false);
    }
}

/// Sign-in form fields
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SignInForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Sign-up and update-password form fields
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewPasswordForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "confirmPassword")]
    pub confirm_password: String,
}

/// Email-only forms (magic link, password reset)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailForm {
    #[serde(default)]
    pub email: String,
}

type SignedInHook = Box<dyn Fn() + Send + Sync>;

/// Form handlers bound to a session client and the public origin
pub struct AuthForms<'a, S: SessionStorage> {
    client: &'a SessionClient<S>,
    origin: &'a str,
    state: FormTracker,
    on_signed_in: Option<SignedInHook>,
}

impl<'a, S: SessionStorage> AuthForms<'a, S> {
    /// `origin` is the public base URL without a trailing slash
    pub fn new(client: &'a SessionClient<S>, origin: &'a str) -> Self {
        Self {
            client,
            origin,
            state: FormTracker::new(),
            on_signed_in: None,
        }
    }

    /// Run `hook` after every successful password sign-in
    pub fn on_signed_in(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_signed_in = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> &FormTracker {
        &self.state
    }

    pub async fn sign_in_with_password(&self, form: &SignInForm) -> FormOutcome {
        let _loading = self.state.begin();
        if form.email.trim().is_empty() || form.password.is_empty() {
            return self.state.finish(FormOutcome::failed(FormError::EmptyFields.to_string()));
        }

        let outcome = match self
            .client
            .sign_in_with_password(form.email.trim(), &form.password)
            .await
        {
            Ok(_) => {
                if let Some(hook) = &self.on_signed_in {
                    hook();
                }
                FormOutcome::succeeded(Some("Signed in successfully!"), Some("/"))
            }
            Err(e) => failure("sign in", &e, translate_sign_in_error),
        };
        self.state.finish(outcome)
    }

    pub async fn sign_up(&self, form: &NewPasswordForm) -> FormOutcome {
        let _loading = self.state.begin();
        if form.email.trim().is_empty() {
            return self.state.finish(FormOutcome::failed(FormError::EmptyFields.to_string()));
        }
        if let Err(e) = validate_new_password(&form.password, &form.confirm_password) {
            return self.state.finish(FormOutcome::failed(e.to_string()));
        }

        let redirect_to = format!("{}/auth/confirm", self.origin);
        let outcome = match self
            .client
            .sign_up(form.email.trim(), &form.password, &redirect_to)
            .await
        {
            Ok(SignUpOutcome::SignedIn(_)) => FormOutcome::succeeded(None, Some("/")),
            Ok(SignUpOutcome::ConfirmationSent) => FormOutcome::succeeded(
                Some("Check your email for the confirmation link!"),
                Some("/auth-confirmation"),
            ),
            Ok(SignUpOutcome::AlreadyRegistered) => FormOutcome::failed(
                "This email is already registered but not confirmed. Please check your inbox.",
            ),
            Err(e) => failure("sign up", &e, translate_auth_error),
        };
        self.state.finish(outcome)
    }

    pub async fn send_magic_link(&self, form: &EmailForm) -> FormOutcome {
        let _loading = self.state.begin();
        if form.email.trim().is_empty() {
            return self.state.finish(FormOutcome::failed(FormError::EmptyFields.to_string()));
        }

        let redirect_to = format!("{}/api/auth/callback", self.origin);
        let outcome = match self.client.sign_in_with_otp(form.email.trim(), &redirect_to).await {
            Ok(()) => FormOutcome::succeeded(Some("Check your inbox to signin"), None),
            Err(e) => failure("magic link", &e, str::to_string),
        };
        self.state.finish(outcome)
    }

    /// Resolve the provider's authorize URL as the redirect target
    pub fn start_oauth(&self, provider: &str) -> FormOutcome {
        let _loading = self.state.begin();
        let redirect_to = format!("{}/auth/callback", self.origin);
        let outcome = match self.client.sign_in_with_oauth(provider, &redirect_to) {
            Ok(url) => FormOutcome::succeeded(None, Some(url.as_str())),
            Err(e) => failure("OAuth sign in", &e, str::to_string),
        };
        self.state.finish(outcome)
    }

    pub async fn request_password_reset(&self, form: &EmailForm) -> FormOutcome {
        let _loading = self.state.begin();
        if form.email.trim().is_empty() {
            return self.state.finish(FormOutcome::failed(FormError::EmptyFields.to_string()));
        }

        let redirect_to = format!("{}/auth/confirm", self.origin);
        let outcome = match self
            .client
            .reset_password_for_email(form.email.trim(), &redirect_to)
            .await
        {
            Ok(()) => FormOutcome::succeeded(Some("Check your email for the password reset link"), None),
            Err(e) => failure("password reset", &e, str::to_string),
        };
        self.state.finish(outcome)
    }

    pub async fn update_password(&self, form: &NewPasswordForm) -> FormOutcome {
        let _loading = self.state.begin();
        if let Err(e) = validate_new_password(&form.password, &form.confirm_password) {
            return self.state.finish(FormOutcome::failed(e.to_string()));
        }

        let outcome = match self.client.update_password(&form.password).await {
            Ok(_) => FormOutcome::succeeded(Some("Password updated successfully"), Some("/sign-in")),
            Err(e) => failure("password update", &e, str::to_string),
        };
        self.state.finish(outcome)
    }
}

/// Provider-reported failures are shown (through `present`); anything else
/// becomes the generic message and is logged
fn failure(action: &str, error: &AuthError, present: impl Fn(&str) -> String) -> FormOutcome {
    if error.is_provider_reported() {
        FormOutcome::failed(present(&error.message()))
    } else {
        tracing::error!("Error during {}: {}", action, error);
        FormOutcome::failed(UNEXPECTED_ERROR)
    }
}
