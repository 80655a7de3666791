//! Memory compressor: topic inference and history compression.
//!
//! Both run after a reply lands. Topic inference fires once per session (a
//! runtime guard prevents duplicate requests); history compression folds the
//! uncompressed window into the session's rolling memory prompt.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::{RequestOptions, StreamEvent, build_completion_request};
use crate::session::message::{DEFAULT_TOPIC, Message, Role};
use crate::session::prompts::{SUMMARIZE_PROMPT, TOPIC_PROMPT};
use crate::session::store::{ChatStore, session_by_id};

/// Total transcript length that makes a session eligible for topic inference.
const TOPIC_TRIGGER_CHARS: usize = 50;

/// Strip the trailing punctuation and quote marks models like to decorate
/// titles with.
pub fn trim_topic(topic: &str) -> String {
    const TRAILING: &[char] = &[
        '，', '。', '！', '？', '”', '“', '"', '、', ',', '.', '!', '?',
    ];
    topic.trim().trim_end_matches(TRAILING).trim().to_string()
}

impl ChatStore {
    /// Run topic inference and history compression for one session.
    pub(crate) async fn summarize_session(&self, session_id: i64) {
        self.maybe_infer_topic(session_id).await;
        self.maybe_compress_history(session_id).await;
    }

    async fn maybe_infer_topic(&self, session_id: i64) {
        let request = {
            let mut state = self.lock();
            let model_config = state.config.model_config.clone();
            let Some(session) = session_by_id(&mut state, session_id) else {
                return;
            };
            if session.topic != DEFAULT_TOPIC || session.topic_inference_pending {
                return;
            }
            let chars: usize = session
                .messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum();
            if chars < TOPIC_TRIGGER_CHARS {
                return;
            }

            // Guard is runtime-only: it blocks a second request while this
            // one is in flight, and a failure clears it so the next message
            // retries.
            session.topic_inference_pending = true;

            let mut messages = session.messages.clone();
            messages.push(Message::new(Role::User, TOPIC_PROMPT));
            build_completion_request(
                &messages,
                &model_config,
                RequestOptions {
                    filter_bot: true,
                    stream: false,
                },
            )
        };

        match self.backend().chat(request).await {
            Ok(reply) => {
                let topic = trim_topic(&reply);
                let result = self
                    .commit(|state| {
                        if let Some(session) = session_by_id(state, session_id) {
                            session.topic_inference_pending = false;
                            if !topic.is_empty() {
                                session.topic = topic;
                            }
                        }
                    })
                    .await;
                if let Err(e) = result {
                    warn!(session_id, error = %e, "failed to persist topic");
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "topic inference failed");
                let mut state = self.lock();
                if let Some(session) = session_by_id(&mut state, session_id) {
                    session.topic_inference_pending = false;
                }
            }
        }
    }

    async fn maybe_compress_history(&self, session_id: i64) {
        let prepared = {
            let mut state = self.lock();
            let config = state.config.clone();
            let Some(session) = session_by_id(&mut state, session_id) else {
                return;
            };

            let start = session.last_summarize_index.min(session.messages.len());
            let mut window: Vec<Message> = session.messages[start..].to_vec();
            let mut chars: usize = window.iter().map(|m| m.content.chars().count()).sum();

            // An oversized window is cut down to the recent-history length
            // before it is measured against the threshold or sent anywhere.
            // A negative count means "replay everything", so nothing is cut.
            if chars > config.model_config.max_tokens as usize && config.history_message_count >= 0
            {
                let keep = config.history_message_count as usize;
                let cut = window.len().saturating_sub(keep);
                window.drain(..cut);
                chars = window.iter().map(|m| m.content.chars().count()).sum();
            }

            if chars <= config.compress_message_length_threshold || !session.send_memory {
                None
            } else {
                let mut messages = Vec::with_capacity(window.len() + 2);
                if !session.memory_prompt.is_empty() {
                    messages.push(Message::new(Role::System, session.memory_prompt.clone()));
                }
                messages.extend(window);
                messages.push(Message::new(Role::User, SUMMARIZE_PROMPT));

                let request = build_completion_request(
                    &messages,
                    &config.model_config,
                    RequestOptions {
                        filter_bot: false,
                        stream: true,
                    },
                );
                // The index advances to the transcript length at trigger
                // time; messages arriving while the summary streams fall
                // into the next window.
                Some((request, session.messages.len()))
            }
        };

        let Some((request, trigger_index)) = prepared else {
            return;
        };

        let cancel = CancellationToken::new();
        let mut stream = match self.backend().stream(request, cancel).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session_id, error = %e, "history compression request failed");
                return;
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Progress(text)) => {
                    let result = self
                        .commit(|state| {
                            if let Some(session) = session_by_id(state, session_id) {
                                session.memory_prompt = text;
                            }
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(session_id, error = %e, "failed to persist memory prompt");
                    }
                }
                Ok(StreamEvent::Done(text)) => {
                    let result = self
                        .commit(|state| {
                            if let Some(session) = session_by_id(state, session_id) {
                                session.memory_prompt = text;
                                session.last_summarize_index = trigger_index;
                            }
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(session_id, error = %e, "failed to persist memory prompt");
                    }
                    return;
                }
                Err(e) => {
                    warn!(session_id, error = %e, "history compression stream failed");
                    return;
                }
            }
        }
    }
}
