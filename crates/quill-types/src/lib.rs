//! Shared types and error hierarchy for Quill.

pub mod error;
pub mod message;
pub mod provider;
pub mod util;

pub use error::{ApiError, ConfigError, GatewayError};
pub use message::*;
pub use provider::{ByteStream, CompletionProvider};
