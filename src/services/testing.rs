//! In-process fakes of the external services, shared by the test modules

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::models::{Chat, ChatMessage, Identity, Session, User};
use crate::services::auth_provider::{AuthError, AuthProvider, CodeChallenge, OtpType, SignUpResponse};
use crate::services::chat_store::{ChatStore, StoreError};
use crate::services::completion::{
    CompletionCredential, CompletionError, CompletionProvider, CompletionStream,
};

fn rejected(status: u16, message: &str) -> AuthError {
    AuthError::Provider {
        status,
        message: message.to_string(),
    }
}

struct Account {
    password: String,
    user: User,
}

/// Auth provider with accounts, tokens and codes held in memory
#[derive(Default)]
pub struct FakeAuthProvider {
    accounts: Mutex<HashMap<String, Account>>,
    access_tokens: Mutex<HashMap<String, User>>,
    refresh_tokens: Mutex<HashMap<String, User>>,
    codes: Mutex<HashMap<String, User>>,
    emails_sent: Mutex<Vec<String>>,
    calls: AtomicUsize,
    counter: AtomicUsize,
    auto_confirm: AtomicBool,
    unreachable: AtomicBool,
}

impl FakeAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.add_account(email, password);
        self
    }

    /// Register a confirmed account
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let mut accounts = self.accounts.lock().unwrap();
        let user = Self::user(&format!("user-{}", accounts.len() + 1), email);
        accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    pub fn with_auto_confirm(self) -> Self {
        self.auto_confirm.store(true, Ordering::SeqCst);
        self
    }

    /// Confirmed user with an email identity
    pub fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: Some(email.to_string()),
            email_confirmed_at: Some(Utc::now()),
            identities: vec![Identity {
                id: id.to_string(),
                provider: "email".to_string(),
            }],
            created_at: Some(Utc::now()),
        }
    }

    /// Mint a live session for `user`
    pub fn issue_session(&self, user: &User) -> Session {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{}", n);
        let refresh = format!("refresh-{}", n);
        self.access_tokens
            .lock()
            .unwrap()
            .insert(access.clone(), user.clone());
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh.clone(), user.clone());
        let mut session = Session::from_tokens(access, refresh);
        session.expires_in = Some(3600);
        session.expires_at = Some(Utc::now().timestamp() + 3600);
        session.user = Some(user.clone());
        session
    }

    /// Register a one-time auth code (or email token hash) for `user`
    pub fn add_code(&self, code: &str, user: User) {
        self.codes.lock().unwrap().insert(code.to_string(), user);
    }

    pub fn revoke(&self, access_token: &str) {
        self.access_tokens.lock().unwrap().remove(access_token);
    }

    /// Make every later call fail at the transport level
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recipients of magic-link and recovery emails
    pub fn emails_sent(&self) -> Vec<String> {
        self.emails_sent.lock().unwrap().clone()
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.accounts
            .lock()
            .unwrap()
            .get(email)
            .map(|a| a.password.clone())
    }

    fn enter(&self) -> Result<(), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AuthError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn take_code(&self, code: &str) -> Result<User, AuthError> {
        self.codes
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| rejected(403, "Token has expired or is invalid"))
    }
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        self.enter()?;
        self.access_tokens
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| rejected(401, "Invalid JWT"))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.enter()?;
        let user = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(rejected(400, "Invalid login credentials")),
            }
        };
        Ok(self.issue_session(&user))
    }

    async fn sign_in_with_otp(
        &self,
        email: &str,
        _redirect_to: &str,
        _challenge: Option<&CodeChallenge>,
    ) -> Result<(), AuthError> {
        self.enter()?;
        self.emails_sent.lock().unwrap().push(email.to_string());
        Ok(())
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        challenge: Option<&CodeChallenge>,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse("https://auth.test/auth/v1/authorize")
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        if let Some(c) = challenge {
            url.query_pairs_mut().append_pair("code_challenge", &c.challenge);
        }
        Ok(url)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _redirect_to: &str,
    ) -> Result<SignUpResponse, AuthError> {
        self.enter()?;
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(existing) = accounts.get(email) {
            let mut hidden = existing.user.clone();
            hidden.identities.clear();
            return Ok(SignUpResponse {
                session: None,
                user: Some(hidden),
            });
        }

        let mut user = Self::user(&format!("user-{}", accounts.len() + 1), email);
        let auto_confirm = self.auto_confirm.load(Ordering::SeqCst);
        if !auto_confirm {
            user.email_confirmed_at = None;
        }
        accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        drop(accounts);

        let session = auto_confirm.then(|| self.issue_session(&user));
        Ok(SignUpResponse {
            session,
            user: Some(user),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.enter()?;
        self.revoke(access_token);
        Ok(())
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Session, AuthError> {
        self.enter()?;
        if code_verifier.is_empty() {
            return Err(rejected(400, "code verifier should be non-empty"));
        }
        let user = self.take_code(code)?;
        Ok(self.issue_session(&user))
    }

    async fn verify_otp(&self, token_hash: &str, _otp_type: OtpType) -> Result<Session, AuthError> {
        self.enter()?;
        let user = self.take_code(token_hash)?;
        Ok(self.issue_session(&user))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.enter()?;
        let user = self
            .refresh_tokens
            .lock()
            .unwrap()
            .remove(refresh_token)
            .ok_or_else(|| rejected(400, "Invalid Refresh Token: Refresh Token Not Found"))?;
        Ok(self.issue_session(&user))
    }

    async fn reset_password_for_email(&self, email: &str, _redirect_to: &str) -> Result<(), AuthError> {
        self.enter()?;
        self.emails_sent.lock().unwrap().push(email.to_string());
        Ok(())
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<User, AuthError> {
        let user = self.get_user(access_token).await?;
        if let Some(email) = &user.email {
            if let Some(account) = self.accounts.lock().unwrap().get_mut(email) {
                account.password = password.to_string();
            }
        }
        Ok(user)
    }
}

/// How the fake completion API behaves
#[derive(Clone)]
pub enum CompletionBehavior {
    /// Stream these chunks, then finish
    Reply(Vec<String>),
    /// Refuse the request before streaming
    Reject,
    /// Stream these chunks, then break
    BreakAfter(Vec<String>),
    /// Stream `first`, wait for `release`, then stream `rest`
    HoldAfterFirst {
        first: String,
        rest: Vec<String>,
        release: Arc<Notify>,
    },
}

/// Completion API fake recording what it was asked
pub struct FakeCompletion {
    behavior: CompletionBehavior,
    calls: AtomicUsize,
    credentials: Mutex<Vec<CompletionCredential>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeCompletion {
    pub fn new(behavior: CompletionBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            credentials: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(chunks: &[&str]) -> Self {
        Self::new(CompletionBehavior::Reply(
            chunks.iter().map(|c| c.to_string()).collect(),
        ))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn credentials(&self) -> Vec<CompletionCredential> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        credential: CompletionCredential,
    ) -> Result<CompletionStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().unwrap().push(credential);
        self.prompts.lock().unwrap().push(messages.to_vec());

        let (held, chunks, fail) = match &self.behavior {
            CompletionBehavior::Reject => {
                return Err(CompletionError::Rejected {
                    status: 401,
                    message: "Incorrect API key provided".to_string(),
                })
            }
            CompletionBehavior::Reply(chunks) => (None, chunks.clone(), false),
            CompletionBehavior::BreakAfter(chunks) => (None, chunks.clone(), true),
            CompletionBehavior::HoldAfterFirst { first, rest, release } => {
                (Some((first.clone(), release.clone())), rest.clone(), false)
            }
        };

        let stream = async_stream::stream! {
            if let Some((first, release)) = held {
                yield Ok(first);
                release.notified().await;
            }
            for chunk in chunks {
                yield Ok(chunk);
            }
            if fail {
                yield Err(CompletionError::Stream("connection reset".to_string()));
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Chat store keeping rows in memory
#[derive(Default)]
pub struct MemoryChatStore {
    rows: Mutex<HashMap<String, Chat>>,
    tokens: Mutex<Vec<String>>,
    calls: AtomicUsize,
    deny: AtomicBool,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every later call with an access error
    pub fn deny_access(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<Chat> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Access tokens the writes were made with
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn upsert_chat(&self, access_token: &str, chat: &Chat) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(StoreError::Access(
                "new row violates row-level security policy".to_string(),
            ));
        }
        self.tokens.lock().unwrap().push(access_token.to_string());
        self.rows
            .lock()
            .unwrap()
            .insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn get_chat(&self, _access_token: &str, id: &str) -> Result<Option<Chat>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(StoreError::Access("permission denied for table chats".to_string()));
        }
        Ok(self.get(id))
    }
}
