//! Session storage backends
//!
//! The session client persists tokens through a small key/value interface.
//! Server code uses [`CookieStorage`], which reads the request's cookies and
//! records every write as a pending `Set-Cookie` mutation for the response.
//! Client-side code uses [`MemoryStorage`].

use axum::http::{header, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Cookie lifetime for stored tokens (30 days)
pub const COOKIE_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Key/value store for session material
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// A cookie write produced while handling a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieMutation {
    pub name: String,
    /// `None` clears the cookie
    pub value: Option<String>,
}

impl CookieMutation {
    /// Render as a `Set-Cookie` header value
    pub fn to_header_value(&self, secure: bool) -> Option<HeaderValue> {
        let mut cookie = match &self.value {
            Some(value) => format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
                self.name,
                urlencoding::encode(value),
                COOKIE_MAX_AGE_SECS
            ),
            None => format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.name),
        };
        if secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

/// Cookie-backed storage for one request
pub struct CookieStorage {
    cookies: RwLock<HashMap<String, String>>,
    mutations: Mutex<Vec<CookieMutation>>,
    secure: bool,
}

impl CookieStorage {
    /// Read the cookies of an incoming request
    pub fn from_headers(headers: &HeaderMap, secure: bool) -> Self {
        Self {
            cookies: RwLock::new(parse_cookies(headers)),
            mutations: Mutex::new(Vec::new()),
            secure,
        }
    }

    /// Drain the writes made so far
    pub fn take_mutations(&self) -> Vec<CookieMutation> {
        let mut mutations = self.mutations.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *mutations)
    }

    /// Append every pending write to a response's headers.
    ///
    /// Later writes to the same cookie win, so only the last one per name is
    /// emitted.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        let mut latest: Vec<CookieMutation> = Vec::new();
        for mutation in self.take_mutations() {
            latest.retain(|m| m.name != mutation.name);
            latest.push(mutation);
        }
        for mutation in latest {
            if let Some(value) = mutation.to_header_value(self.secure) {
                headers.append(header::SET_COOKIE, value);
            }
        }
    }

    fn record(&self, mutation: CookieMutation) {
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mutation);
    }
}

impl SessionStorage for CookieStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.cookies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        self.record(CookieMutation {
            name: key.to_string(),
            value: Some(value.to_string()),
        });
    }

    fn remove(&self, key: &str) {
        let existed = self
            .cookies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some();
        if existed {
            self.record(CookieMutation {
                name: key.to_string(),
                value: None,
            });
        }
    }
}

/// In-process storage (client contexts, tests)
#[derive(Clone, Default)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Parse the `Cookie` header(s) into name -> decoded value
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(name), Some(raw)) = (parts.next(), parts.next()) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let decoded = urlencoding::decode(raw.trim())
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.trim().to_string());
            cookies.insert(name.to_string(), decoded);
        }
    }
    cookies
}
