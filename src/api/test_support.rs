//! Router harness for the handler tests

use axum::http::{header, HeaderValue};
use axum_test::{TestResponse, TestServer};
use secrecy::SecretString;
use std::sync::Arc;
use url::Url;

use crate::api::{build_router, AppState};
use crate::config::{AppConfig, CompletionSettings};
use crate::models::Session;
use crate::pages::PageRenderer;
use crate::services::chat::ChatService;
use crate::services::testing::{FakeAuthProvider, FakeCompletion, MemoryChatStore};

pub const ORIGIN: &str = "http://localhost:3000";

fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 3000,
        public_base_url: Url::parse(ORIGIN).unwrap(),
        cookie_secure: false,
        backend_url: Url::parse("https://project.test").unwrap(),
        anon_key: SecretString::from("anon-key".to_string()),
        completion: CompletionSettings {
            api_key: SecretString::from("sk-test".to_string()),
            base_url: Url::parse("https://api.test/v1/").unwrap(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
        },
    }
}

/// Full router wired to in-memory fakes
pub struct TestApp {
    pub server: TestServer,
    pub auth: Arc<FakeAuthProvider>,
    pub completion: Arc<FakeCompletion>,
    pub store: Arc<MemoryChatStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_completion(FakeCompletion::replying(&["Hello", " there"]))
    }

    pub fn with_completion(completion: FakeCompletion) -> Self {
        let auth = Arc::new(FakeAuthProvider::new());
        let completion = Arc::new(completion);
        let store = Arc::new(MemoryChatStore::new());
        let config = test_config();
        let origin = config.origin();

        let state = AppState {
            config: Arc::new(config),
            auth: auth.clone(),
            chat_service: Arc::new(ChatService::new(completion.clone(), store.clone())),
            pages: Arc::new(PageRenderer::new().unwrap()),
        };
        let server = TestServer::new(build_router(state, &origin)).unwrap();

        Self {
            server,
            auth,
            completion,
            store,
        }
    }

    /// Fresh session for a confirmed account
    pub fn signed_in_session(&self) -> Session {
        let user = self.auth.add_account("jane@example.com", "password123");
        self.auth.issue_session(&user)
    }
}

/// `Cookie` header carrying `session`
pub fn session_cookie(session: &Session) -> HeaderValue {
    let mut cookie = format!(
        "sb-access-token={}; sb-refresh-token={}",
        session.access_token, session.refresh_token
    );
    if let Some(expires_at) = session.expires_at {
        cookie.push_str(&format!("; sb-expires-at={}", expires_at));
    }
    HeaderValue::from_str(&cookie).unwrap()
}

/// Names of the cookies a response sets or clears
pub fn set_cookie_names(response: &TestResponse) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|c| c.split('=').next())
        .map(str::to_string)
        .collect()
}

/// `Cookie` header replaying every cookie a response set
pub fn replay_cookies(response: &TestResponse) -> HeaderValue {
    let pairs: Vec<&str> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|c| !c.contains("Max-Age=0"))
        .filter_map(|c| c.split(';').next())
        .collect();
    HeaderValue::from_str(&pairs.join("; ")).unwrap()
}

/// Last `Set-Cookie` value written for `name`
pub fn last_set_cookie(response: &TestResponse, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|c| c.starts_with(&prefix))
        .last()
        .map(str::to_string)
}
