//! Async stream that converts SSE bytes into typed completion chunks.

use crate::sse::{SseEvent, SseParser};
use bytes::Bytes;
use futures_core::Stream;
use pin_project_lite::pin_project;
use quill_types::{ApiError, ChatCompletionChunk};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

type InnerStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

pin_project! {
    /// An async stream of [`ChatCompletionChunk`]s parsed from a raw SSE body.
    ///
    /// Ends at `data: [DONE]` or when the byte stream ends. An upstream error
    /// is yielded once and ends the stream.
    pub struct ChunkStream {
        #[pin]
        inner: InnerStream,
        parser: SseParser,
        pending: VecDeque<Result<ChatCompletionChunk, ApiError>>,
        finished: bool,
    }
}

impl ChunkStream {
    /// Create a new ChunkStream from a byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl Stream for ChunkStream {
    type Item = Result<ChatCompletionChunk, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    for event in this.parser.feed(&bytes) {
                        if enqueue(event, &mut *this.pending) {
                            *this.finished = true;
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    if let Some(event) = this.parser.finish() {
                        enqueue(event, &mut *this.pending);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parse one event into the queue. Returns `true` at end of stream.
fn enqueue(
    event: SseEvent,
    pending: &mut VecDeque<Result<ChatCompletionChunk, ApiError>>,
) -> bool {
    if event.is_done() {
        return true;
    }
    match parse_chunk(&event.data) {
        Ok(chunk) => {
            pending.push_back(Ok(chunk));
            false
        }
        Err(e) => {
            pending.push_back(Err(e));
            true
        }
    }
}

/// Parse a `data:` payload into a chunk, surfacing in-band error objects.
pub fn parse_chunk(data: &str) -> Result<ChatCompletionChunk, ApiError> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ApiError::StreamParse(e.to_string()))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ApiError::StreamError { message });
    }

    serde_json::from_value(value).map_err(|e| ApiError::StreamParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chunk_reads_delta() {
        let chunk =
            parse_chunk(r#"{"choices":[{"index":0,"delta":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(chunk.content().as_deref(), Some("hi"));
    }

    #[test]
    fn parse_chunk_surfaces_error_object() {
        let err = parse_chunk(r#"{"error":{"message":"content filtered","code":"x"}}"#)
            .unwrap_err();
        match err {
            ApiError::StreamError { message } => assert_eq!(message, "content filtered"),
            other => panic!("Expected StreamError, got {other:?}"),
        }
    }

    #[test]
    fn parse_chunk_rejects_garbage() {
        assert!(matches!(
            parse_chunk("not json"),
            Err(ApiError::StreamParse(_))
        ));
    }
}
