//! Azure OpenAI chat-completions client with SSE streaming for Quill.

mod client;
mod deployment;
mod provider;
mod retry;
mod sse;
mod stream;

pub use client::{ApiClient, DEFAULT_API_VERSION, DEFAULT_TIMEOUT};
pub use deployment::{Deployment, Deployments};
pub use provider::AzureProvider;
pub use retry::RetryConfig;
pub use sse::{SseEvent, SseParser};
pub use stream::{ChunkStream, parse_chunk};
