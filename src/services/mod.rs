//! Services layer - Business logic
//!
//! This module contains the chat front-end's services:
//! - Auth provider client and the cookie-backed session client on top of it
//! - Auth form handlers and error translation
//! - Completion streaming and chat persistence
//! - Client-side session context

pub mod auth_errors;
pub mod auth_forms;
pub mod auth_provider;
pub mod chat;
pub mod chat_store;
pub mod completion;
pub mod session;
pub mod session_context;
pub mod session_storage;

#[cfg(test)]
pub(crate) mod testing;

pub use auth_forms::{AuthForms, FormOutcome, FormState};
pub use auth_provider::{AuthError, AuthProvider, GoTrueClient, OtpType};
pub use chat::{ChatError, ChatService};
pub use chat_store::{ChatStore, PostgrestChatStore, StoreError};
pub use completion::{CompletionCredential, CompletionError, CompletionProvider, OpenAiCompletionClient};
pub use session::{AuthEvent, AuthEventKind, AuthSubscription, SessionClient, SignUpOutcome};
pub use session_context::{Navigator, Phase, SessionContext, SessionSnapshot};
pub use session_storage::{CookieStorage, MemoryStorage, SessionStorage};
