//! Provider trait for upstream chat-completion services.

use crate::{ApiError, ChatCompletion, ChatRequest};
use bytes::Bytes;
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;

/// A boxed stream of raw response bytes from a streaming completion.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Trait for chat-completion providers.
///
/// Dyn-compatible so the gateway works with `Arc<dyn CompletionProvider>`.
/// Implementations resolve `request.tier` to a deployment on every call and
/// must not mutate shared state to do so.
pub trait CompletionProvider: Send + Sync {
    /// Send a non-streaming completion request.
    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, ApiError>> + Send + 'a>>;

    /// Send a streaming completion request, returning the raw SSE body.
    fn complete_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ApiError>> + Send + 'a>>;

    /// Provider name for logging (e.g., "azure-openai").
    fn name(&self) -> &str;
}
