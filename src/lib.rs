//! Client-side orchestration for streaming LLM chat sessions.
//!
//! Palaver manages a set of chat sessions: it assembles requests from
//! contextual prompts, compressed memory, and recent history; streams
//! replies with idle-timeout and cancellation handling; infers session
//! topics; compresses old history into a rolling memory prompt; and
//! persists everything as a versioned document with migrations.
//!
//! Entry point is [`session::ChatStore`], opened over a
//! [`api::CompletionBackend`] (usually [`api::ChatTransport`]) and a
//! [`store::StateStore`] (usually [`store::FileStateStore`]).

// ============================================================================
// Modules
// ============================================================================

pub mod api;
pub mod background;
pub mod config;
pub mod session;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::{ApiError, ChatTransport, CompletionBackend, StreamEvent};
pub use config::{AccessConfig, ChatConfig, ModelConfig};
pub use session::{ChatSession, ChatStore, Message, Role};
pub use store::{FileStateStore, PersistedState, StorageError};
