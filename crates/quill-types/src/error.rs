//! Error hierarchy for Quill.

use thiserror::Error;

/// Errors that end a client request before any stream is returned.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Conversation is empty")]
    EmptyConversation,

    #[error(
        "Token budget of {budget} cannot hold the latest turn (~{last_turn_tokens} tokens)"
    )]
    TruncationDegenerate {
        budget: usize,
        last_turn_tokens: usize,
    },

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] ApiError),
}

/// Errors from the upstream chat-completion service.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Upstream stream error: {message}")]
    StreamError { message: String },

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Upstream returned no content")]
    EmptyResponse,
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
