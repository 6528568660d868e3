// SSE relay: forwards upstream event-stream records to the client one at a
// time, with keep-alive heartbeats and prompt cancellation on disconnect

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const HEARTBEAT: &[u8] = b": heartbeat\n\n";
const DONE_PAYLOAD: &str = "[DONE]";

pub type ClientChunk = Result<Bytes, std::io::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Entered on the first record read from upstream.
    Streaming,
    /// Client gone or relay cancelled; upstream still being released.
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UpstreamEof,
    Sentinel,
    ClientDisconnected,
    Cancelled,
    ReadError,
    WriteError,
}

impl CloseReason {
    fn needs_drain(self) -> bool {
        !matches!(self, CloseReason::UpstreamEof | CloseReason::Sentinel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub reason: CloseReason,
    pub records: u64,
    pub heartbeats: u64,
    /// States entered, in order. Always ends with `Closed`.
    pub states: Vec<RelayState>,
}

/// Client side of the relay. Capacity 1: at most one record is ever queued
/// ahead of the transport.
pub fn client_channel() -> (mpsc::Sender<ClientChunk>, mpsc::Receiver<ClientChunk>) {
    mpsc::channel(1)
}

/// Streaming response whose body is fed by the relay. Dropping the body
/// (client disconnect) closes the channel, which the relay observes.
pub fn sse_response(status: StatusCode, mut rx: mpsc::Receiver<ClientChunk>) -> Response {
    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    };

    let builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive");

    match builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to build streaming response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Write side shared by the read loop and the heartbeat task. Holding the
/// lock covers one complete "write + flush".
struct ClientWriter {
    tx: mpsc::Sender<ClientChunk>,
    last_data: Instant,
}

impl ClientWriter {
    async fn write_record(&mut self, record: Bytes) -> Result<(), ()> {
        self.tx.send(Ok(record)).await.map_err(|_| ())
    }
}

/// Splits an upstream byte stream into newline-terminated records.
/// Cancel-safe: bytes are moved into the buffer as soon as they arrive.
struct LineFramer<S> {
    upstream: S,
    buffer: BytesMut,
    eof: bool,
}

impl<S, E> LineFramer<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    fn new(upstream: S) -> Self {
        Self {
            upstream,
            buffer: BytesMut::new(),
            eof: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<Bytes>, E> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(Some(line.freeze()));
            }
            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // unterminated tail
                return Ok(Some(self.buffer.split().freeze()));
            }
            match self.upstream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

fn data_payload(line: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(line).ok()?;
    text.strip_prefix("data:").map(str::trim)
}

fn is_sentinel(line: &[u8]) -> bool {
    data_payload(line) == Some(DONE_PAYLOAD)
}

fn frame(line: &[u8]) -> Bytes {
    let mut record = BytesMut::with_capacity(line.len() + 2);
    record.extend_from_slice(line);
    record.extend_from_slice(b"\n\n");
    record.freeze()
}

/// Diagnostics only; never influences forwarding.
fn inspect_record(line: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    let Some(payload) = data_payload(line) else {
        return;
    };
    let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
        return;
    };
    let choice = chunk.get("choices").and_then(|c| c.get(0));
    if let Some(reason) = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|r| r.as_str())
    {
        tracing::trace!(finish_reason = reason, "stream chunk finished");
    }
    if let Some(calls) = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("tool_calls"))
        .and_then(|t| t.as_array())
    {
        tracing::trace!(tool_call_deltas = calls.len(), "stream chunk carries tool calls");
    }
}

fn transition(states: &mut Vec<RelayState>, next: RelayState) {
    tracing::debug!(from = ?states.last(), to = ?next, "relay state");
    states.push(next);
}

#[derive(Debug, Clone)]
pub struct StreamRelay {
    heartbeat_interval: Duration,
}

impl StreamRelay {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }

    /// Relay `upstream` to `client` until EOF, the `[DONE]` sentinel, an I/O
    /// error, client disconnect or `cancel`. The upstream stream is dropped
    /// before this returns.
    pub async fn run<S, E>(
        &self,
        upstream: S,
        client: mpsc::Sender<ClientChunk>,
        cancel: CancellationToken,
    ) -> RelaySummary
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let cancel = cancel.child_token();
        let writer = Arc::new(Mutex::new(ClientWriter {
            tx: client.clone(),
            last_data: Instant::now(),
        }));
        let heartbeat = tokio::spawn(heartbeat_loop(
            writer.clone(),
            self.heartbeat_interval,
            cancel.clone(),
        ));

        let mut framer = LineFramer::new(Box::pin(upstream));
        let mut states = Vec::with_capacity(3);
        let mut records: u64 = 0;

        let reason = loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                _ = client.closed() => break CloseReason::ClientDisconnected,
                line = framer.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => {
                    if states.is_empty() {
                        transition(&mut states, RelayState::Streaming);
                    }
                    line
                }
                Ok(None) => break CloseReason::UpstreamEof,
                Err(e) => {
                    tracing::warn!("Error reading stream: {}", e);
                    break CloseReason::ReadError;
                }
            };

            if is_blank(&line) {
                continue;
            }
            inspect_record(&line);
            let sentinel = is_sentinel(&line);

            let mut guard = writer.lock().await;
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = guard.write_record(frame(&line)) => Some(result),
            };
            match written {
                None => break CloseReason::Cancelled,
                Some(Err(())) => {
                    tracing::debug!("Error writing to response, client gone");
                    break CloseReason::WriteError;
                }
                Some(Ok(())) => {
                    guard.last_data = Instant::now();
                    records += 1;
                }
            }
            drop(guard);

            if sentinel {
                break CloseReason::Sentinel;
            }
        };

        if reason.needs_drain() {
            transition(&mut states, RelayState::Draining);
        }
        cancel.cancel();
        drop(framer);
        let heartbeats = heartbeat.await.unwrap_or_else(|e| {
            tracing::error!("Heartbeat task failed: {}", e);
            0
        });
        transition(&mut states, RelayState::Closed);

        let summary = RelaySummary {
            reason,
            records,
            heartbeats,
            states,
        };
        match reason {
            CloseReason::UpstreamEof | CloseReason::Sentinel => {
                tracing::info!(records, heartbeats, ?reason, "stream completed")
            }
            _ => tracing::warn!(records, heartbeats, ?reason, "stream ended early"),
        }
        summary
    }
}

async fn heartbeat_loop(
    writer: Arc<Mutex<ClientWriter>>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut guard = writer.lock().await;
        if guard.last_data.elapsed() < interval {
            continue;
        }
        let written = tokio::select! {
            _ = cancel.cancelled() => None,
            result = guard.write_record(Bytes::from_static(HEARTBEAT)) => Some(result),
        };
        match written {
            None => break,
            Some(Ok(())) => sent += 1,
            Some(Err(())) => {
                tracing::debug!("Error sending heartbeat, cancelling relay");
                cancel.cancel();
                break;
            }
        }
    }
    sent
}
