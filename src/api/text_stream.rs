//! Raw text chunk stream over HTTP response bytes.
//!
//! The streaming endpoint sends plain UTF-8 text, not SSE frames. Network
//! chunk boundaries can land in the middle of a multi-byte character, so
//! incomplete tail bytes are carried over and prepended to the next chunk.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::api::error::{ApiError, ApiResult};

/// Adapts a byte stream into a stream of decoded text chunks.
pub struct TextChunkStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    carry: Vec<u8>,
    done: bool,
}

impl TextChunkStream {
    pub fn new(inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
            carry: Vec::new(),
            done: false,
        }
    }

    /// Take the decodable prefix of the carry buffer, leaving any incomplete
    /// trailing character for the next chunk.
    fn take_complete(&mut self) -> String {
        let complete_len = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // Incomplete trailing character: decode up to it.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid bytes mid-stream: decode everything lossily.
            Err(_) => self.carry.len(),
        };

        let chunk: Vec<u8> = self.carry.drain(..complete_len).collect();
        String::from_utf8_lossy(&chunk).into_owned()
    }
}

impl Stream for TextChunkStream {
    type Item = ApiResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.carry.extend_from_slice(&bytes);
                    let text = self.take_complete();
                    if text.is_empty() {
                        // Whole chunk was an incomplete character; need more.
                        continue;
                    }
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ApiError::from(e))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if self.carry.is_empty() {
                        return Poll::Ready(None);
                    }
                    // Flush whatever is left, replacing any dangling bytes.
                    let rest = std::mem::take(&mut self.carry);
                    let text = String::from_utf8_lossy(&rest).into_owned();
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> impl Stream<Item = reqwest::Result<Bytes>> {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    async fn collect_text(chunks: Vec<&'static [u8]>) -> Vec<String> {
        TextChunkStream::new(byte_stream(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn passes_through_ascii_chunks() {
        let chunks = collect_text(vec![b"Hello", b", world"]).await;
        assert_eq!(chunks, vec!["Hello", ", world"]);
    }

    #[tokio::test]
    async fn reassembles_split_multibyte_character() {
        // "é" is 0xC3 0xA9; split it across chunks.
        let chunks = collect_text(vec![b"caf\xC3", b"\xA9 time"]).await;
        assert_eq!(chunks, vec!["caf", "é time"]);
        assert_eq!(chunks.concat(), "café time");
    }

    #[tokio::test]
    async fn chunk_of_only_partial_character_is_held() {
        // Four-byte emoji split into single bytes: only the final chunk
        // completes the character.
        let chunks = collect_text(vec![b"\xF0", b"\x9F", b"\x98", b"\x80"]).await;
        assert_eq!(chunks, vec!["😀"]);
    }

    #[tokio::test]
    async fn dangling_bytes_at_eof_are_replaced() {
        let chunks = collect_text(vec![b"ok\xC3"]).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "ok");
        assert_eq!(chunks[1], "\u{FFFD}");
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let chunks = collect_text(vec![]).await;
        assert!(chunks.is_empty());
    }
}
