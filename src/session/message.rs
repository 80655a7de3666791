//! Chat message and session data model.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic assigned to new sessions until one is inferred.
pub const DEFAULT_TOPIC: &str = "New Conversation";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

static NEXT_ID: AtomicI64 = AtomicI64::new(0);

/// Allocate a message/session id.
///
/// Ids are the creation timestamp in milliseconds, bumped past the previous
/// id when allocations land in the same millisecond, so they stay unique and
/// ordered within the process.
pub fn next_id() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut id = now;
    let _ = NEXT_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        id = last.max(now - 1) + 1;
        Some(id)
    });
    id
}

/// Allocate the id directly after `id`, advancing the allocator past it so
/// later allocations stay unique and ordered.
pub fn next_id_after(id: i64) -> i64 {
    let next = id + 1;
    let _ = NEXT_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(last.max(next)));
    next
}

/// One message in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub date: DateTime<Utc>,

    /// True while a reply is being streamed into this message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,

    /// True when the exchange this message belongs to failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            role,
            content: content.into(),
            date: Utc::now(),
            streaming: false,
            is_error: false,
        }
    }
}

/// Running totals for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStat {
    pub token_count: u64,
    pub word_count: u64,
    pub char_count: u64,
}

/// A conversation: transcript, contextual prompts, and compressed memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: i64,
    pub topic: String,

    /// Whether the compressed memory prompt is included in outgoing requests.
    #[serde(default = "default_send_memory")]
    pub send_memory: bool,

    /// Rolling summary of compressed history.
    #[serde(default)]
    pub memory_prompt: String,

    /// Pinned contextual prompts, sent ahead of the transcript.
    #[serde(default)]
    pub context: Vec<Message>,

    pub messages: Vec<Message>,

    #[serde(default)]
    pub stat: SessionStat,

    pub last_update: DateTime<Utc>,

    /// Index of the first message not yet covered by `memory_prompt`.
    #[serde(default)]
    pub last_summarize_index: usize,

    /// Guard against concurrent topic inference requests. Runtime-only.
    #[serde(skip)]
    pub topic_inference_pending: bool,
}

fn default_send_memory() -> bool {
    true
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: next_id(),
            topic: DEFAULT_TOPIC.to_string(),
            send_memory: true,
            memory_prompt: String::new(),
            context: Vec::new(),
            messages: Vec::new(),
            stat: SessionStat::default(),
            last_update: Utc::now(),
            last_summarize_index: 0,
            topic_inference_pending: false,
        }
    }

    /// The memory prompt as a system message, when there is one to send.
    pub fn memory_message(&self) -> Option<Message> {
        if self.send_memory && !self.memory_prompt.is_empty() {
            Some(Message::new(Role::System, self.memory_prompt.clone()))
        } else {
            None
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = next_id();
        let b = next_id();
        let c = next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn next_id_after_is_adjacent_and_reserved() {
        let base = next_id();
        let follow = next_id_after(base);
        assert_eq!(follow, base + 1);
        // The reserved id is never handed out again.
        assert!(next_id() > follow);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"system\"").unwrap(),
            Role::System
        );
    }

    #[test]
    fn default_flags_are_omitted_from_json() {
        let message = Message::new(Role::User, "hi");
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("streaming").is_none());
        assert!(json.get("is_error").is_none());

        let mut streaming = message.clone();
        streaming.streaming = true;
        let json = serde_json::to_value(&streaming).unwrap();
        assert_eq!(json["streaming"], true);
    }

    #[test]
    fn new_session_defaults() {
        let session = ChatSession::new();
        assert_eq!(session.topic, DEFAULT_TOPIC);
        assert!(session.send_memory);
        assert!(session.messages.is_empty());
        assert_eq!(session.last_summarize_index, 0);
    }

    #[test]
    fn memory_message_respects_flag_and_emptiness() {
        let mut session = ChatSession::new();
        assert!(session.memory_message().is_none());

        session.memory_prompt = "Summary so far.".to_string();
        let memory = session.memory_message().unwrap();
        assert_eq!(memory.role, Role::System);
        assert_eq!(memory.content, "Summary so far.");

        session.send_memory = false;
        assert!(session.memory_message().is_none());
    }

    #[test]
    fn pending_guard_survives_serde_as_false() {
        let mut session = ChatSession::new();
        session.topic_inference_pending = true;
        let json = serde_json::to_string(&session).unwrap();
        let restored: ChatSession = serde_json::from_str(&json).unwrap();
        assert!(!restored.topic_inference_pending);
    }
}
