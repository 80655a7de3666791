//! Wire request construction for the chat completion endpoints.

use serde::Serialize;

use crate::config::ModelConfig;
use crate::session::{Message, Role};

/// One message as sent over the wire. Only the role and text survive the
/// projection; local bookkeeping (ids, dates, flags) stays client-side.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of a completion request.
///
/// `max_tokens` is deliberately absent: the response length cap is enforced
/// client-side during history assembly, not passed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    pub model: String,
    pub temperature: f64,
    pub presence_penalty: f64,
}

/// Options controlling how a request is assembled.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Drop assistant messages before sending (used by internal requests
    /// like topic inference so the model only sees user/system text).
    pub filter_bot: bool,

    /// Request a streaming response.
    pub stream: bool,
}

/// Project session messages into a wire request.
pub fn build_completion_request(
    messages: &[Message],
    model_config: &ModelConfig,
    options: RequestOptions,
) -> CompletionRequest {
    let messages = messages
        .iter()
        .filter(|m| !(options.filter_bot && m.role == Role::Assistant))
        .map(WireMessage::from)
        .collect();

    CompletionRequest {
        messages,
        stream: options.stream.then_some(true),
        model: model_config.model.clone(),
        temperature: model_config.temperature,
        presence_penalty: model_config.presence_penalty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::new(Role::System, "You are helpful."),
            Message::new(Role::User, "Hi"),
            Message::new(Role::Assistant, "Hello!"),
            Message::new(Role::User, "Tell me more"),
        ]
    }

    #[test]
    fn builds_request_with_all_roles() {
        let config = ModelConfig::default();
        let request = build_completion_request(
            &sample_messages(),
            &config,
            RequestOptions {
                filter_bot: false,
                stream: true,
            },
        );

        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.model, config.model);
    }

    #[test]
    fn filter_bot_drops_assistant_messages() {
        let request = build_completion_request(
            &sample_messages(),
            &ModelConfig::default(),
            RequestOptions {
                filter_bot: true,
                stream: false,
            },
        );

        assert_eq!(request.messages.len(), 3);
        assert!(request.messages.iter().all(|m| m.role != Role::Assistant));
    }

    #[test]
    fn non_streaming_omits_stream_field() {
        let request = build_completion_request(
            &sample_messages(),
            &ModelConfig::default(),
            RequestOptions::default(),
        );

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
    }
}
