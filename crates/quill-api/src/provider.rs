//! Azure OpenAI implementation of [`CompletionProvider`].

use crate::client::ApiClient;
use quill_types::{ApiError, ByteStream, ChatCompletion, ChatRequest, CompletionProvider};
use std::future::Future;
use std::pin::Pin;

/// Azure OpenAI chat-completions provider.
///
/// Wraps `ApiClient` and implements the `CompletionProvider` trait. Retry
/// and timeout handling stay in `ApiClient`.
#[derive(Clone)]
pub struct AzureProvider {
    client: ApiClient,
}

impl AzureProvider {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

impl CompletionProvider for AzureProvider {
    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, ApiError>> + Send + 'a>> {
        Box::pin(self.client.create_completion(request))
    }

    fn complete_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ApiError>> + Send + 'a>> {
        Box::pin(self.client.create_completion_stream(request))
    }

    fn name(&self) -> &str {
        "azure-openai"
    }
}
