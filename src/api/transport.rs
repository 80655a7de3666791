//! HTTP transport for the chat completion endpoints.
//!
//! Two operations: a one-shot completion (`chat`) and a streaming completion
//! (`stream`). The streaming path wraps the response body in
//! [`AccumulatingStream`], which accumulates text, enforces the per-chunk
//! idle deadline, and reacts to caller cancellation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::request::CompletionRequest;
use crate::api::text_stream::TextChunkStream;
use crate::config::AccessConfig;

/// Deadline for establishing a connection, and between streamed chunks.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Proxy path for completion requests, forwarded via the `path` header.
const COMPLETION_PATH: &str = "v1/chat/completions";

// ============================================================================
// Stream events
// ============================================================================

/// Progress of a streaming completion. `Progress` carries the full text
/// accumulated so far, not the delta; `Done` is the single terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Progress(String),
    Done(String),
}

/// A pinned, boxed stream of completion events.
pub type ChatStream = Pin<Box<dyn Stream<Item = ApiResult<StreamEvent>> + Send>>;

/// Seam between the session layer and the HTTP client, so tests can drive
/// sessions with scripted replies.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// One-shot completion: returns the full reply text.
    async fn chat(&self, request: CompletionRequest) -> ApiResult<String>;

    /// Streaming completion. The returned stream honors `cancel` and applies
    /// the per-chunk idle deadline.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ApiResult<ChatStream>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// Reqwest-backed [`CompletionBackend`] talking to the API proxy.
#[derive(Debug, Clone)]
pub struct ChatTransport {
    client: reqwest::Client,
    base_url: String,
    access: AccessConfig,
}

impl ChatTransport {
    pub fn new(base_url: impl Into<String>, access: AccessConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access,
        }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Attach the proxy path and credential headers shared by all requests.
    pub(crate) fn apply_headers(
        &self,
        builder: reqwest::RequestBuilder,
        proxy_path: &str,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder.header("path", proxy_path);
        if !self.access.token.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.access.token));
        } else if !self.access.access_code.is_empty() {
            builder = builder.header("access-code", self.access.access_code.clone());
        }
        builder
    }

    fn completion_builder(&self, path: &str, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.endpoint(path)).json(request);
        self.apply_headers(builder, COMPLETION_PATH)
    }

    /// Map a response status to an error, or pass the response through.
    pub(crate) fn check_status(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(ApiError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

#[async_trait]
impl CompletionBackend for ChatTransport {
    async fn chat(&self, request: CompletionRequest) -> ApiResult<String> {
        let send = self.completion_builder("api/chat", &request).send();
        let response = match tokio::time::timeout(REQUEST_TIMEOUT, send).await {
            Ok(result) => result?,
            Err(_) => return Err(ApiError::Timeout),
        };

        let response = Self::check_status(response)?;
        let body: CompletionResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::MalformedResponse("response has no choices".to_string()))
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ApiResult<ChatStream> {
        let send = self.completion_builder("api/chat-stream", &request).send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ApiError::Aborted),
            result = tokio::time::timeout(REQUEST_TIMEOUT, send) => match result {
                Ok(result) => result?,
                Err(_) => return Err(ApiError::Timeout),
            },
        };

        let response = Self::check_status(response)?;
        debug!(status = %response.status(), "streaming response connected");

        let text = TextChunkStream::new(response.bytes_stream());
        Ok(Box::pin(AccumulatingStream::new(
            Box::pin(text),
            cancel,
            REQUEST_TIMEOUT,
        )))
    }
}

// ============================================================================
// Accumulating stream
// ============================================================================

/// Wraps a text chunk stream into [`StreamEvent`]s.
///
/// - Accumulates chunks; every `Progress` carries the full text so far.
/// - Resets an idle deadline on each chunk. A lapse is not an error: the
///   stream finishes cleanly with what was received and cancels the token so
///   the HTTP request is torn down.
/// - Caller cancellation surfaces as `ApiError::Aborted`.
/// - Emits exactly one terminal item (a `Done` or an error), then `None`.
pub struct AccumulatingStream {
    inner: Pin<Box<dyn Stream<Item = ApiResult<String>> + Send>>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    idle: Pin<Box<Sleep>>,
    idle_timeout: Duration,
    accumulated: String,
    finished: bool,
}

impl AccumulatingStream {
    #[must_use]
    pub fn new(
        inner: Pin<Box<dyn Stream<Item = ApiResult<String>> + Send>>,
        cancel: CancellationToken,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            idle: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_timeout,
            accumulated: String::new(),
            finished: false,
        }
    }
}

impl Stream for AccumulatingStream {
    type Item = ApiResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.finished = true;
            return Poll::Ready(Some(Err(ApiError::Aborted)));
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.accumulated.push_str(&chunk);
                let deadline = Instant::now() + self.idle_timeout;
                self.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(StreamEvent::Progress(self.accumulated.clone()))))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                // A cancelled request usually surfaces as a transport error
                // rather than via the token future; normalize it.
                if self.cancel.is_cancelled() {
                    Poll::Ready(Some(Err(ApiError::Aborted)))
                } else {
                    Poll::Ready(Some(Err(e)))
                }
            }
            Poll::Ready(None) => {
                self.finished = true;
                let text = std::mem::take(&mut self.accumulated);
                Poll::Ready(Some(Ok(StreamEvent::Done(text))))
            }
            Poll::Pending => {
                if self.idle.as_mut().poll(cx).is_ready() {
                    // Stalled: finish with what we have and tear down the
                    // underlying request.
                    self.finished = true;
                    self.cancel.cancel();
                    let text = std::mem::take(&mut self.accumulated);
                    return Poll::Ready(Some(Ok(StreamEvent::Done(text))));
                }
                Poll::Pending
            }
        }
    }
}
