//! Session layer: data model, the chat store, cancellation, and memory.
//!
//! Architecture:
//! - [`ChatStore`] owns all sessions behind a single mutex; mutations are
//!   synchronous closures applied under it, then persisted.
//! - Replies stream in the background: `on_user_input` appends the user
//!   message plus a streaming placeholder, registers a cancellation token in
//!   the [`CancelRegistry`], and spawns a task that folds stream events into
//!   the placeholder.
//! - After each reply the memory compressor may infer a topic and fold old
//!   history into the session's memory prompt.

pub mod cancel;
pub mod memory;
pub mod message;
pub mod prompts;
pub mod store;

pub use cancel::CancelRegistry;
pub use memory::trim_topic;
pub use message::{ChatSession, DEFAULT_TOPIC, Message, Role, SessionStat, next_id, next_id_after};
pub use store::{ChatStore, DeletedSession};
