//! Streaming dispatch of the final conversation.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use quill_api::{SseEvent, SseParser, parse_chunk};
use quill_types::{ApiError, ByteStream, ChatRequest, CompletionProvider, ConversationTurn, ModelTier};

/// Which tier serves each kind of upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Final completion for ordinary requests.
    pub dispatch: ModelTier,
    /// Final completion for structure requests.
    pub structure_dispatch: ModelTier,
    pub classify: ModelTier,
    pub elaborate: ModelTier,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            dispatch: ModelTier::Fast,
            structure_dispatch: ModelTier::Fast,
            classify: ModelTier::Fast,
            elaborate: ModelTier::Fast,
        }
    }
}

impl TierPolicy {
    pub fn dispatch_tier(&self, structure: bool) -> ModelTier {
        if structure {
            self.structure_dispatch
        } else {
            self.dispatch
        }
    }
}

/// Opens the streaming completion for a conversation.
pub struct Dispatcher {
    provider: Arc<dyn CompletionProvider>,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Start a streaming completion on `tier`.
    ///
    /// The upstream is read until the first event that carries content or a
    /// finish reason. Role preambles and filter results before it are held
    /// back, and any failure up to that point (transport error, timeout,
    /// in-band error event) is returned here instead of after the response
    /// has started. Everything read is replayed in front of the rest.
    pub async fn dispatch(
        &self,
        turns: Vec<ConversationTurn>,
        tier: ModelTier,
    ) -> Result<ByteStream, ApiError> {
        let request = ChatRequest::streaming(tier, turns);
        tracing::debug!(
            provider = self.provider.name(),
            %tier,
            turns = request.messages.len(),
            "Dispatching completion"
        );

        let mut upstream = self.provider.complete_stream(&request).await?;
        let mut parser = SseParser::new();
        let mut held: Vec<Bytes> = Vec::new();
        loop {
            match upstream.next().await {
                Some(Ok(bytes)) => {
                    let started = starts_response(parser.feed(&bytes))?;
                    held.push(bytes);
                    if started {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    starts_response(parser.finish())?;
                    tracing::debug!("Upstream ended before any content");
                    return Ok(Box::pin(replay(held)));
                }
            }
        }
        tracing::debug!(held = held.len(), "Upstream response started");
        Ok(Box::pin(replay(held).chain(upstream)))
    }
}

/// Whether `events` contain the start of the answer. An error event, or an
/// unparsable one, before that start is returned as the error.
fn starts_response(events: impl IntoIterator<Item = SseEvent>) -> Result<bool, ApiError> {
    for event in events {
        if event.is_done() {
            return Ok(true);
        }
        let chunk = parse_chunk(&event.data)?;
        if chunk.content().is_some() || chunk.finish_reason().is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn replay(held: Vec<Bytes>) -> impl futures_core::Stream<Item = Result<Bytes, ApiError>> + Send + 'static {
    stream::iter(held.into_iter().map(Ok))
}
