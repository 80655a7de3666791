//! Common test utilities: a scripted completion backend and store setup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use palaver::api::{ApiError, ApiResult, ChatStream, CompletionRequest, StreamEvent};
use palaver::session::ChatStore;
use palaver::store::FileStateStore;
use palaver::CompletionBackend;

/// One scripted backend response, consumed in call order.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Streaming reply delivered as deltas; the stream emits cumulative
    /// `Progress` events and a final `Done`.
    Chunks(Vec<&'static str>),
    /// One-shot reply for `chat()`.
    Reply(&'static str),
    /// One-shot reply that waits for the gate before answering.
    GatedReply(&'static str, Arc<tokio::sync::Notify>),
    /// Reject the request with HTTP 401.
    Unauthorized,
    /// Never produce output; ends with `Aborted` once cancelled.
    Hang,
}

/// Backend that replays a script and records every request it receives.
pub struct MockBackend {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_scripted(&self, request: CompletionRequest) -> Scripted {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("backend called more times than scripted")
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn chat(&self, request: CompletionRequest) -> ApiResult<String> {
        match self.next_scripted(request) {
            Scripted::Reply(text) => Ok(text.to_string()),
            Scripted::GatedReply(text, gate) => {
                gate.notified().await;
                Ok(text.to_string())
            }
            Scripted::Chunks(deltas) => Ok(deltas.concat()),
            Scripted::Unauthorized => Err(ApiError::Unauthorized { status: 401 }),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ApiResult<ChatStream> {
        match self.next_scripted(request) {
            Scripted::Chunks(deltas) => {
                let mut accumulated = String::new();
                let mut events: Vec<ApiResult<StreamEvent>> = Vec::new();
                for delta in deltas {
                    accumulated.push_str(delta);
                    events.push(Ok(StreamEvent::Progress(accumulated.clone())));
                }
                events.push(Ok(StreamEvent::Done(accumulated)));
                Ok(Box::pin(futures::stream::iter(events)))
            }
            Scripted::Reply(text) => {
                let events = vec![
                    Ok(StreamEvent::Progress(text.to_string())),
                    Ok(StreamEvent::Done(text.to_string())),
                ];
                Ok(Box::pin(futures::stream::iter(events)))
            }
            Scripted::GatedReply(text, gate) => {
                let stream = futures::stream::once(async move {
                    gate.notified().await;
                    Ok(StreamEvent::Done(text.to_string()))
                });
                Ok(Box::pin(stream))
            }
            Scripted::Unauthorized => Err(ApiError::Unauthorized { status: 401 }),
            Scripted::Hang => {
                let stream = futures::stream::once(async move {
                    cancel.cancelled().await;
                    Err(ApiError::Aborted)
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// Open a store over a scripted backend and a temp state file.
pub async fn open_store(script: Vec<Scripted>) -> (ChatStore, Arc<MockBackend>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let backend = MockBackend::new(script);
    let persistence = Arc::new(FileStateStore::new(temp_dir.path().join("state.json")));
    let store = ChatStore::open(backend.clone(), persistence).await.unwrap();
    (store, backend, temp_dir)
}
