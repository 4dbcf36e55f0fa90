//! HTTP surface: the streaming chat endpoint and a health check.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::StreamExt;
use quill_core::Gateway;
use quill_types::{ApiError, ConversationTurn, GatewayError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Marks the body as the data-stream line protocol the editor parses.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Cancelled on shutdown; every in-flight stream hangs off it.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ErrorResponse> {
    let frames = state.gateway.handle(body.messages, &state.shutdown).await?;
    let body = Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(frame.encode())));

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static(DATA_STREAM_HEADER),
                HeaderValue::from_static("v1"),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// A request failure that happened before any stream was started.
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    body: ErrorBody,
}

impl From<GatewayError> for ErrorResponse {
    fn from(err: GatewayError) -> Self {
        let (status, code) = match &err {
            GatewayError::EmptyConversation => (StatusCode::BAD_REQUEST, "EMPTY_CONVERSATION"),
            GatewayError::TruncationDegenerate { .. } => {
                (StatusCode::BAD_REQUEST, "CONTEXT_TOO_LARGE")
            }
            GatewayError::Dispatch(ApiError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT")
            }
            GatewayError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED"),
        };
        tracing::warn!(status = status.as_u16(), code, "{err}");
        ErrorResponse {
            status,
            body: ErrorBody {
                error: err.to_string(),
                code,
            },
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quill_context::HeuristicEstimator;
    use quill_core::TierPolicy;
    use quill_types::{
        ByteStream, ChatCompletion, ChatRequest, CompletionProvider, TokenBudget,
    };
    use std::future::Future;
    use std::pin::Pin;

    /// Classifies everything as "false" and streams a fixed reply, or fails.
    struct FixedProvider {
        stream_error: Option<ApiError>,
    }

    impl CompletionProvider for FixedProvider {
        fn complete<'a>(
            &'a self,
            _request: &'a ChatRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, ApiError>> + Send + 'a>> {
            Box::pin(async {
                serde_json::from_str(r#"{"choices":[{"message":{"content":"false"}}]}"#)
                    .map_err(|e| ApiError::InvalidResponse(e.to_string()))
            })
        }

        fn complete_stream<'a>(
            &'a self,
            _request: &'a ChatRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ApiError>> + Send + 'a>> {
            let result = match &self.stream_error {
                Some(e) => Err(e.clone()),
                None => {
                    let body = concat!(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                        "data: [DONE]\n\n",
                    );
                    let stream: ByteStream = Box::pin(futures_util::stream::iter(vec![Ok(
                        Bytes::from_static(body.as_bytes()),
                    )]));
                    Ok(stream)
                }
            };
            Box::pin(async move { result })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    async fn serve(stream_error: Option<ApiError>, budget: usize) -> String {
        let gateway = Gateway::new(
            Arc::new(FixedProvider { stream_error }),
            Arc::new(HeuristicEstimator),
            TokenBudget(budget),
            TierPolicy::default(),
        );
        let app = router(AppState {
            gateway: Arc::new(gateway),
            shutdown: CancellationToken::new(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "messages": [{"id": "1", "role": "user", "content": content, "html": "<p>x</p>"}]
        })
    }

    #[tokio::test]
    async fn health_reports_version() {
        let base = serve(None, 4000).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn chat_streams_data_protocol() {
        let base = serve(None, 4000).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&chat_body("hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[DATA_STREAM_HEADER], "v1");
        assert_eq!(
            response.text().await.unwrap(),
            "0:\"Hi\"\n2:[{\"finish_reason\":\"stop\"}]\n"
        );
    }

    #[tokio::test]
    async fn empty_conversation_is_bad_request() {
        let base = serve(None, 4000).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&serde_json::json!({"messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "EMPTY_CONVERSATION");
    }

    #[tokio::test]
    async fn oversized_turn_is_bad_request() {
        let base = serve(None, 2).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&chat_body("this turn is far larger than two tokens"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "CONTEXT_TOO_LARGE");
    }

    #[tokio::test]
    async fn upstream_failures_map_to_gateway_statuses() {
        let base = serve(
            Some(ApiError::Server {
                status: 500,
                message: "boom".into(),
            }),
            4000,
        )
        .await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&chat_body("hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);

        let base = serve(Some(ApiError::Timeout), 4000).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&chat_body("hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 504);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "UPSTREAM_TIMEOUT");
    }
}
