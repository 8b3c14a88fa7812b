//! Data models
//!
//! - Session and User as issued by the auth provider (read-only here)
//! - Chat transcripts as persisted to the data store

mod chat;
mod session;
mod user;

pub use chat::{derive_title, Chat, ChatMessage, ChatRequest, Role, TITLE_MAX_CHARS};
pub use session::Session;
pub use user::{Identity, User};
