//! Scripted completion provider shared by the unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;
use quill_types::{ApiError, ByteStream, ChatCompletion, ChatRequest, CompletionProvider};

type ScriptedStream = Result<Vec<Result<Bytes, ApiError>>, ApiError>;

/// Returns queued responses in order and records every request it sees.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    completions: Mutex<VecDeque<Result<ChatCompletion, ApiError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn push_completion(&self, response: Result<ChatCompletion, ApiError>) {
        self.completions.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_stream(&self, response: ScriptedStream) {
        self.streams.lock().unwrap().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl CompletionProvider for ScriptedProvider {
    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, ApiError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.completions.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| Err(ApiError::Network("no scripted completion".into())))
        })
    }

    fn complete_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ApiError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.streams.lock().unwrap().pop_front();
        Box::pin(async move {
            let items = next.unwrap_or_else(|| Err(ApiError::Network("no scripted stream".into())))?;
            let stream: ByteStream = Box::pin(futures_util::stream::iter(items));
            Ok(stream)
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub(crate) fn completion(text: &str) -> ChatCompletion {
    serde_json::from_value(serde_json::json!({
        "id": "chatcmpl-test",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    }))
    .unwrap()
}

pub(crate) fn delta_event(text: &str) -> Bytes {
    let chunk = serde_json::json!({
        "id": "chatcmpl-test",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    });
    Bytes::from(format!("data: {chunk}\n\n"))
}

pub(crate) fn finish_event(reason: &str) -> Bytes {
    let chunk = serde_json::json!({
        "id": "chatcmpl-test",
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
    });
    Bytes::from(format!("data: {chunk}\n\n"))
}

pub(crate) fn done_event() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// The content-free first chunk upstreams send before any text.
pub(crate) fn role_event() -> Bytes {
    let chunk = serde_json::json!({
        "id": "chatcmpl-test",
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
    });
    Bytes::from(format!("data: {chunk}\n\n"))
}

/// An in-band error object in place of a chunk.
pub(crate) fn error_event(message: &str) -> Bytes {
    let error = serde_json::json!({"error": {"message": message, "code": "content_filter"}});
    Bytes::from(format!("data: {error}\n\n"))
}
