//! Configuration management
//!
//! Configuration is loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Optional values fall back to defaults. The hosted backend URL, its public
//! key, the completion API key and the public base URL are required; a
//! missing one is a startup error reported by [`Config::validate`], never a
//! request-time failure.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Hosted backend (auth provider and data store)
    #[serde(default)]
    pub backend: BackendConfig,
    /// Completion API configuration
    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin used for redirect targets (e.g. `https://chat.example.com`)
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Mark session cookies `Secure`
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: None,
            cookie_secure: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Hosted backend configuration.
///
/// The same project URL serves the auth API (`/auth/v1`) and the REST data
/// store (`/rest/v1`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendConfig {
    /// Project URL
    #[serde(default)]
    pub url: Option<String>,
    /// Public (anon) API key
    #[serde(default)]
    pub anon_key: Option<SecretString>,
}

/// Completion API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Default API credential
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// API base URL (OpenAI compatible)
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    /// Model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_completion_base_url(),
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Configuration after validation: every required value present and parsed.
///
/// Immutable once built; request handlers only ever read it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub public_base_url: Url,
    pub cookie_secure: bool,
    pub backend_url: Url,
    pub anon_key: SecretString,
    pub completion: CompletionSettings,
}

/// Validated completion settings
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_key: SecretString,
    pub base_url: Url,
    pub model: String,
    pub temperature: f32,
}

impl AppConfig {
    /// Origin string without trailing slash, for building redirect targets
    pub fn origin(&self) -> String {
        self.public_base_url.as_str().trim_end_matches('/').to_string()
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Recognised variables:
    /// - CHATBOT_SERVER_HOST, CHATBOT_SERVER_PORT, CHATBOT_COOKIE_SECURE
    /// - CHATBOT_PUBLIC_BASE_URL (or NEXT_PUBLIC_BASE_URL)
    /// - SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL)
    /// - SUPABASE_ANON_KEY (or NEXT_PUBLIC_SUPABASE_ANON_KEY)
    /// - OPENAI_API_KEY, OPENAI_BASE_URL
    /// - CHATBOT_COMPLETION_MODEL, CHATBOT_COMPLETION_TEMPERATURE
    pub fn load_with_env(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CHATBOT_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CHATBOT_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(secure) = std::env::var("CHATBOT_COOKIE_SECURE") {
            match secure.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.server.cookie_secure = true,
                "0" | "false" | "no" => self.server.cookie_secure = false,
                _ => {} // Ignore invalid values
            }
        }
        if let Some(base) = first_env(&["CHATBOT_PUBLIC_BASE_URL", "NEXT_PUBLIC_BASE_URL"]) {
            self.server.public_base_url = Some(base);
        }

        if let Some(url) = first_env(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]) {
            self.backend.url = Some(url);
        }
        if let Some(key) = first_env(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"]) {
            self.backend.anon_key = Some(SecretString::from(key));
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.completion.api_key = Some(SecretString::from(key));
        }
        if let Ok(base) = std::env::var("OPENAI_BASE_URL") {
            self.completion.base_url = base;
        }
        if let Ok(model) = std::env::var("CHATBOT_COMPLETION_MODEL") {
            self.completion.model = model;
        }
        if let Ok(temp) = std::env::var("CHATBOT_COMPLETION_TEMPERATURE") {
            if let Ok(temp) = temp.parse::<f32>() {
                self.completion.temperature = temp;
            }
        }
    }

    /// Check required settings and parse URLs
    pub fn validate(&self) -> Result<AppConfig, ConfigError> {
        let public_base_url = parse_url(
            "server.public_base_url",
            self.server.public_base_url.as_deref(),
        )?;
        let backend_url = parse_url("backend.url", self.backend.url.as_deref())?;
        let anon_key = required_secret("backend.anon_key", self.backend.anon_key.as_ref())?;
        let api_key = required_secret("completion.api_key", self.completion.api_key.as_ref())?;
        let completion_base =
            parse_url("completion.base_url", Some(self.completion.base_url.as_str()))?;

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "completion.temperature must be within 0.0..=2.0, got {}",
                self.completion.temperature
            )));
        }

        Ok(AppConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            public_base_url,
            cookie_secure: self.server.cookie_secure,
            backend_url,
            anon_key,
            completion: CompletionSettings {
                api_key,
                base_url: completion_base,
                model: self.completion.model.clone(),
                temperature: self.completion.temperature,
            },
        })
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| std::env::var(k).ok())
}

fn parse_url(key: &'static str, value: Option<&str>) -> Result<Url, ConfigError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))?;
    Url::parse(value).map_err(|e| ConfigError::ValidationError(format!("{}: {}", key, e)))
}

fn required_secret(
    key: &'static str,
    value: Option<&SecretString>,
) -> Result<SecretString, ConfigError> {
    match value {
        Some(secret) if !secret.expose_secret().trim().is_empty() => Ok(secret.clone()),
        _ => Err(ConfigError::Missing(key)),
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "CHATBOT_SERVER_HOST",
    "CHATBOT_SERVER_PORT",
    "CHATBOT_COOKIE_SECURE",
    "CHATBOT_PUBLIC_BASE_URL",
    "NEXT_PUBLIC_BASE_URL",
    "SUPABASE_URL",
    "NEXT_PUBLIC_SUPABASE_URL",
    "SUPABASE_ANON_KEY",
    "NEXT_PUBLIC_SUPABASE_ANON_KEY",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "CHATBOT_COMPLETION_MODEL",
    "CHATBOT_COMPLETION_TEMPERATURE",
];


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Any subset of server settings in the file is honoured and the rest defaulted
        #[test]
        fn partial_server_config_fills_defaults(
            port in prop::option::of(1u16..=65535),
            host in prop::option::of("[a-z]{1,10}"),
        ) {
            let mut yaml = String::from("server:\n");
            if let Some(port) = port {
                yaml.push_str(&format!("  port: {}\n", port));
            }
            if let Some(ref host) = host {
                yaml.push_str(&format!("  host: \"{}\"\n", host));
            }
            if port.is_none() && host.is_none() {
                yaml.push_str("  cookie_secure: false\n");
            }

            let mut file = NamedTempFile::new().unwrap();
            write!(file, "{}", yaml).unwrap();
            let config = Config::load(file.path()).unwrap();

            prop_assert_eq!(config.server.port, port.unwrap_or(3000));
            prop_assert_eq!(config.server.host, host.unwrap_or_else(|| "0.0.0.0".to_string()));
            prop_assert_eq!(config.completion.model, "gpt-3.5-turbo".to_string());
        }

        /// Validation never succeeds while any required key is missing
        #[test]
        fn validation_requires_every_key(mask in 0u8..15) {
            let mut config = Config::default();
            if mask & 1 != 0 {
                config.server.public_base_url = Some("http://localhost:3000".to_string());
            }
            if mask & 2 != 0 {
                config.backend.url = Some("http://localhost:54321".to_string());
            }
            if mask & 4 != 0 {
                config.backend.anon_key = Some(SecretString::from("anon".to_string()));
            }
            if mask & 8 != 0 {
                config.completion.api_key = Some(SecretString::from("sk".to_string()));
            }
            prop_assert!(config.validate().is_err());
        }
    }
}
