//! Chat completion client
//!
//! Streams assistant text from an OpenAI-compatible `/chat/completions`
//! endpoint over server-sent events.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use secrecy::{ExposeSecret, SecretString};
use std::pin::Pin;
use url::Url;

use crate::config::CompletionSettings;
use crate::models::ChatMessage;

/// Stream of text deltas
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Completion errors
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The API refused the request (bad key, unknown model, quota...)
    #[error("Completion request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Completion API unreachable: {0}")]
    Transport(String),

    /// The event stream broke or carried an unreadable chunk
    #[error("Completion stream error: {0}")]
    Stream(String),
}

/// API key to use for one completion call.
///
/// A preview token supplied with the request applies to that call only.
#[derive(Clone)]
pub enum CompletionCredential {
    /// The key from configuration
    Configured,
    /// A caller-supplied key
    Preview(SecretString),
}

impl CompletionCredential {
    /// Pick the credential for a request; blank preview tokens are ignored
    pub fn from_preview_token(token: Option<&str>) -> Self {
        match token.map(str::trim) {
            Some(t) if !t.is_empty() => CompletionCredential::Preview(SecretString::from(t.to_string())),
            _ => CompletionCredential::Configured,
        }
    }
}

impl std::fmt::Debug for CompletionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionCredential::Configured => f.write_str("Configured"),
            CompletionCredential::Preview(_) => f.write_str("Preview([REDACTED])"),
        }
    }
}

/// Contract of the completion API
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a streamed completion.
    ///
    /// Returns once the API has accepted the request; failures after that
    /// arrive through the stream.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        credential: CompletionCredential,
    ) -> Result<CompletionStream, CompletionError>;
}

/// OpenAI-compatible streaming client
pub struct OpenAiCompletionClient {
    http: Client,
    endpoint: Url,
    api_key: SecretString,
    model: String,
    temperature: f32,
}

impl OpenAiCompletionClient {
    pub fn new(http: Client, settings: &CompletionSettings) -> Result<Self, CompletionError> {
        let mut base = settings.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| CompletionError::Transport(format!("bad base url: {}", e)))?;
        Ok(Self {
            http,
            endpoint,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        })
    }
}

/// Pull the text delta out of one SSE data payload
fn delta_text(data: &str) -> Result<String, CompletionError> {
    let parsed: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| CompletionError::Stream(format!("Failed to parse SSE data: {}", e)))?;
    Ok(parsed["choices"][0]["delta"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string())
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        credential: CompletionCredential,
    ) -> Result<CompletionStream, CompletionError> {
        let api_key = match &credential {
            CompletionCredential::Preview(key) => key,
            CompletionCredential::Configured => &self.api_key,
        };

        let builder = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(messages));
        let mut es = builder
            .eventsource()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        // Wait for the API to accept the request so rejections surface
        // before any byte reaches the client
        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {}
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                es.close();
                let message = response.text().await.unwrap_or_default();
                return Err(CompletionError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }
            Some(Err(reqwest_eventsource::Error::Transport(e))) => {
                es.close();
                return Err(CompletionError::Transport(e.to_string()));
            }
            Some(Err(e)) => {
                es.close();
                return Err(CompletionError::Stream(e.to_string()));
            }
            None => return Err(CompletionError::Stream("stream closed before opening".into())),
        }

        let stream = async_stream::stream! {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        if msg.data == "[DONE]" {
                            break;
                        }
                        match delta_text(&msg.data) {
                            Ok(delta) if delta.is_empty() => {}
                            Ok(delta) => yield Ok(delta),
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(CompletionError::Stream(e.to_string()));
                        break;
                    }
                }
            }
            es.close();
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn settings(base: &str) -> CompletionSettings {
        CompletionSettings {
            api_key: SecretString::from("sk-test".to_string()),
            base_url: Url::parse(base).unwrap(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
        }
    }

    #[test]
    fn test_endpoint_joins_base_path() {
        let client = OpenAiCompletionClient::new(Client::new(), &settings("https://api.openai.com/v1")).unwrap();
        assert_eq!(client.endpoint().as_str(), "https://api.openai.com/v1/chat/completions");

        let client = OpenAiCompletionClient::new(Client::new(), &settings("http://localhost:8080/")).unwrap();
        assert_eq!(client.endpoint().as_str(), "http://localhost:8080/chat/completions");
    }

    #[test]
    fn test_request_body_streams_with_configured_model() {
        let client = OpenAiCompletionClient::new(Client::new(), &settings("https://api.openai.com/v1")).unwrap();
        let body = client.request_body(&[ChatMessage::user("Hi")]);
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], Role::User.to_string());
        assert_eq!(body["messages"][0]["content"], "Hi");
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_delta_text() {
        let chunk = r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#;
        assert_eq!(delta_text(chunk).unwrap(), "Hel");
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#;
        assert_eq!(delta_text(role_only).unwrap(), "");
        assert!(matches!(delta_text("not json"), Err(CompletionError::Stream(_))));
    }

    #[test]
    fn test_preview_token_credential() {
        assert!(matches!(
            CompletionCredential::from_preview_token(Some("sk-preview")),
            CompletionCredential::Preview(_)
        ));
        assert!(matches!(
            CompletionCredential::from_preview_token(Some("  ")),
            CompletionCredential::Configured
        ));
        assert!(matches!(
            CompletionCredential::from_preview_token(None),
            CompletionCredential::Configured
        ));
        let debug = format!("{:?}", CompletionCredential::from_preview_token(Some("sk-secret")));
        assert!(!debug.contains("sk-secret"));
    }
}
