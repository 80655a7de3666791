//! API layer: request construction, HTTP transport, and streaming plumbing.

pub mod error;
pub mod request;
pub mod text_stream;
pub mod transport;
pub mod usage;

pub use error::{ApiError, ApiResult};
pub use request::{CompletionRequest, RequestOptions, WireMessage, build_completion_request};
pub use transport::{
    AccumulatingStream, ChatStream, ChatTransport, CompletionBackend, REQUEST_TIMEOUT, StreamEvent,
};
pub use usage::UsageReport;
