//! Re-emits an upstream completion stream as client frames plus a single
//! terminal marker.
//!
//! One task reads the upstream body and copies every item into two bounded
//! channels. The primary copy becomes text frames. The side copy is parsed
//! independently to find out how the stream ended, and that answer is
//! delivered once, after the last text frame.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use pin_project_lite::pin_project;
use quill_api::ChunkStream;
use quill_types::{ApiError, ByteStream, TerminalMarker};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Items buffered per consumer before the upstream reader waits.
const CHANNEL_CAPACITY: usize = 32;

type Item = Result<Bytes, ApiError>;

/// One unit of client output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A content delta, forwarded unmodified.
    Text(String),
    /// The side-channel value, always last.
    Marker(TerminalMarker),
}

impl Frame {
    /// Encode as one line of the data-stream protocol.
    ///
    /// Text is `0:<json string>\n`, the marker is `2:[<json>]\n`.
    pub fn encode(&self) -> Bytes {
        let line = match self {
            Frame::Text(text) => {
                format!("0:{}\n", serde_json::Value::String(text.clone()))
            }
            Frame::Marker(marker) => format!("2:{}\n", serde_json::json!([marker])),
        };
        Bytes::from(line)
    }
}

/// Where a [`Reemitter`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    Streaming,
    AwaitingMarker,
    Closed,
}

pin_project! {
    /// Client-facing stream of [`Frame`]s.
    ///
    /// Yields text frames until the primary copy ends, then exactly one
    /// marker frame, then ends. Dropping it cancels the upstream reader.
    pub struct Reemitter {
        #[pin]
        primary: ChunkStream,
        marker: oneshot::Receiver<TerminalMarker>,
        state: EmitState,
        frames: usize,
        _cancel_on_drop: DropGuard,
    }
}

impl Reemitter {
    /// Start re-emitting `upstream`.
    ///
    /// The reader stops when `cancel` fires or when the returned stream is
    /// dropped. Dropping only cancels a child of `cancel`.
    pub fn new(upstream: ByteStream, cancel: &CancellationToken) -> Self {
        let cancel = cancel.child_token();
        let (primary_tx, primary_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (side_tx, side_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (marker_tx, marker_rx) = oneshot::channel();

        tokio::spawn(fan_out(upstream, primary_tx, side_tx, cancel.clone()));
        tokio::spawn(resolve_marker(receiver_stream(side_rx), marker_tx));

        Self {
            primary: ChunkStream::new(receiver_stream(primary_rx)),
            marker: marker_rx,
            state: EmitState::Streaming,
            frames: 0,
            _cancel_on_drop: cancel.drop_guard(),
        }
    }

    pub fn state(&self) -> EmitState {
        self.state
    }
}

impl Stream for Reemitter {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        let mut this = self.project();

        loop {
            match *this.state {
                EmitState::Streaming => match this.primary.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        if let Some(text) = chunk.content() {
                            *this.frames += 1;
                            return Poll::Ready(Some(Frame::Text(text)));
                        }
                    }
                    Poll::Ready(Some(Err(e))) => {
                        tracing::warn!(error = %e, frames = *this.frames, "Upstream stream failed mid-response");
                        *this.state = EmitState::AwaitingMarker;
                    }
                    Poll::Ready(None) => *this.state = EmitState::AwaitingMarker,
                    Poll::Pending => return Poll::Pending,
                },
                EmitState::AwaitingMarker => {
                    let marker = match Pin::new(&mut *this.marker).poll(cx) {
                        Poll::Ready(Ok(marker)) => marker,
                        Poll::Ready(Err(_)) => {
                            TerminalMarker::Failed("stream ended without a terminal marker".into())
                        }
                        Poll::Pending => return Poll::Pending,
                    };
                    *this.state = EmitState::Closed;
                    tracing::debug!(frames = *this.frames, ?marker, "Response stream closed");
                    return Poll::Ready(Some(Frame::Marker(marker)));
                }
                EmitState::Closed => return Poll::Ready(None),
            }
        }
    }
}

/// Read `upstream` once and hand every item to both consumers.
async fn fan_out(
    mut upstream: ByteStream,
    primary: mpsc::Sender<Item>,
    side: mpsc::Sender<Item>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Upstream read cancelled");
                // The resolver drains `side` until it has a marker, so this
                // only waits behind items already queued.
                let _ = side.send(Err(ApiError::Network("request cancelled".into()))).await;
                return;
            }
            item = upstream.next() => item,
        };
        let Some(item) = item else {
            return;
        };
        let failed = item.is_err();

        // The side consumer hangs up once it has a marker; that is fine.
        let _ = side.send(item.clone()).await;
        if primary.send(item).await.is_err() {
            tracing::debug!("Client went away; dropping upstream");
            return;
        }
        if failed {
            return;
        }
    }
}

async fn resolve_marker(
    side: impl Stream<Item = Item> + Send + 'static,
    marker_tx: oneshot::Sender<TerminalMarker>,
) {
    let mut chunks = ChunkStream::new(side);
    let marker = loop {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                if let Some(reason) = chunk.finish_reason() {
                    break TerminalMarker::FinishReason(reason.to_string());
                }
            }
            Some(Err(e)) => break TerminalMarker::Failed(e.to_string()),
            None => break TerminalMarker::Done,
        }
    };
    let _ = marker_tx.send(marker);
}

fn receiver_stream(rx: mpsc::Receiver<Item>) -> impl Stream<Item = Item> + Send + 'static {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}
