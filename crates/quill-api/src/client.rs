//! Azure OpenAI chat-completions client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use quill_types::{ApiError, ByteStream, ChatCompletion, ChatRequest, ConversationTurn, ModelTier};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::deployment::Deployments;
use crate::retry::RetryConfig;

/// The `api-version` query parameter sent when none is configured.
pub const DEFAULT_API_VERSION: &str = "2023-07-01-preview";

/// Upstream call timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Request body on the wire.
#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    stream: bool,
}

/// Client for an Azure-hosted chat-completions resource.
///
/// The client is shared by all requests. Tier routing happens per call in
/// [`ApiClient::endpoint`], nothing on the client changes after construction.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    api_version: String,
    deployments: Arc<Deployments>,
    retry_config: RetryConfig,
    timeout: Duration,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        deployments: Deployments,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployments: Arc::new(deployments),
            retry_config: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the retry configuration for transient errors (429, 5xx, network, timeout).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Set the upstream timeout. It bounds each attempt's wait for response
    /// headers and, separately, every read of the body. A stream that keeps
    /// producing may run longer in total.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn deployments(&self) -> &Deployments {
        &self.deployments
    }

    /// The chat-completions URL for a tier.
    pub fn endpoint(&self, tier: ModelTier) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.base_url,
            self.deployments.get(tier).deployment
        )
    }

    /// Send a non-streaming request and decode the completion.
    pub async fn create_completion(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, ApiError> {
        let response = self.send(request).await?;
        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Send a streaming request and return the raw SSE body.
    ///
    /// A body that stays silent for longer than the timeout yields
    /// [`ApiError::Timeout`] and ends.
    pub async fn create_completion_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<ByteStream, ApiError> {
        let response = self.send(request).await?;
        let timeout = self.timeout;
        let body = Box::pin(response.bytes_stream());
        let stream = stream::unfold(Some(body), move |body| async move {
            let mut body = body?;
            match tokio::time::timeout(timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(body))),
                Ok(Some(Err(e))) => Some((Err(ApiError::Network(e.to_string())), None)),
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!(?timeout, "Upstream body stalled");
                    Some((Err(ApiError::Timeout), None))
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(request.tier);
        let deployment = self.deployments.get(request.tier);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| ApiError::Auth {
                message: "Invalid API key format".into(),
            })?,
        );

        let body = serde_json::to_string(&WireRequest {
            model: &deployment.model,
            messages: &request.messages,
            stream: request.stream,
        })
        .map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let attempts = self.retry_config.attempts();
        for attempt in 0..attempts {
            tracing::debug!(
                tier = %request.tier,
                deployment = %deployment.deployment,
                stream = request.stream,
                "POST {url} (attempt {}/{})",
                attempt + 1,
                attempts
            );

            let send = self
                .http
                .post(&url)
                .query(&[("api-version", self.api_version.as_str())])
                .headers(headers.clone())
                .body(body.clone())
                .send();

            let (err, retry_after) = match tokio::time::timeout(self.timeout, send).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (
                        classify_error(status.as_u16(), &body_text, retry_after),
                        retry_after,
                    )
                }
                Ok(Err(e)) if e.is_timeout() => (ApiError::Timeout, None),
                Ok(Err(e)) => (ApiError::Network(e.to_string()), None),
                Err(_) => (ApiError::Timeout, None),
            };

            if !self.retry_config.should_retry(&err, attempt) {
                return Err(err);
            }

            let delay = self.retry_config.delay(attempt, retry_after);
            tracing::warn!(
                "Retryable upstream error (attempt {}/{attempts}): {err}. Retrying in {delay:?}...",
                attempt + 1,
            );
            tokio::time::sleep(delay).await;
        }

        Err(ApiError::Network("no upstream attempt was made".into()))
    }
}

/// The `retry-after` header, in (possibly fractional) seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, retry_after: Option<Duration>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        },
        _ => ApiError::Server { status, message },
    }
}
