//! Replication bridge between a message-framed socket and a byte stream.
//!
//! A [`Bridge`] owns one replication session. It forwards every socket
//! message to the stream and every chunk read from the stream to the
//! socket, until both directions have ended or one side fails.
//!
//! # States
//!
//! ```text
//!            socket ends                 stream ends
//!   Open ───────────────► HalfClosedBySocket ───────────┐
//!    │                                                  ▼
//!    │       stream ends                 socket ends  Closed
//!    └──────────────────► HalfClosedByStream ───────────┘
//!
//!   any error, or BridgeHandle::close ──────────────► Closed
//! ```
//!
//! # Backpressure
//!
//! Each direction holds at most one chunk in flight. The next socket
//! message is not pulled until the previous one has been written and
//! flushed to the stream, and the stream is not read again until the
//! previous chunk has been accepted and flushed by the socket sink. Memory
//! per session is therefore bounded by `chunk_size` plus whatever the two
//! transports buffer themselves.
//!
//! # Failure
//!
//! An error on either side ends the session immediately: the handle reports
//! [`BridgeState::Closed`] before any teardown starts. The other side then
//! gets a best-effort close, bounded by `close_grace`, and both are
//! dropped before [`Bridge::run`] returns. Nothing is retried; a client
//! reconnects and starts a new session.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Boxed transport error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default upper bound on one outbound read.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default time allowed for closing the surviving side after a failure.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Forwarding in both directions.
    Open,
    /// The socket ended; stream output is still forwarded.
    HalfClosedBySocket,
    /// The stream ended; socket input is still forwarded.
    HalfClosedByStream,
    /// Terminal.
    Closed,
}

/// Why a bridge reached [`BridgeState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Both directions ended cleanly.
    Completed,
    SocketError,
    StreamError,
    /// [`BridgeHandle::close`] was called.
    Cancelled,
}

/// A transport failure. Ends only the session it occurred in.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("socket error: {0}")]
    Socket(#[source] BoxError),

    #[error("stream error: {0}")]
    Stream(#[from] io::Error),
}

impl BridgeError {
    fn socket(err: impl Into<BoxError>) -> Self {
        BridgeError::Socket(err.into())
    }

    fn reason(&self) -> CloseReason {
        match self {
            BridgeError::Socket(_) => CloseReason::SocketError,
            BridgeError::Stream(_) => CloseReason::StreamError,
        }
    }
}

/// Bridge tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum bytes read from the stream per socket message.
    pub chunk_size: usize,
    /// Time allowed for the best-effort close after a failure or
    /// cancellation.
    pub close_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl BridgeConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct BridgeReport {
    /// Bytes forwarded from the socket to the stream.
    pub bytes_in: u64,
    /// Bytes forwarded from the stream to the socket.
    pub bytes_out: u64,
    pub reason: CloseReason,
    /// The failure, when `reason` is an error.
    pub error: Option<BridgeError>,
}

struct Shared {
    state: watch::Sender<BridgeState>,
    cancel: watch::Sender<bool>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Shared {
    /// Move to `next` unless already closed.
    fn transition(&self, next: BridgeState) {
        self.state.send_if_modified(|state| {
            if *state == BridgeState::Closed || *state == next {
                return false;
            }
            tracing::trace!(from = ?*state, to = ?next, "bridge state change");
            *state = next;
            true
        });
    }
}

/// Observes and controls a running [`Bridge`].
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
}

impl BridgeHandle {
    /// Current state.
    pub fn state(&self) -> BridgeState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.shared.state.subscribe()
    }

    /// Wait until the bridge is closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == BridgeState::Closed).await;
    }

    /// Ask the bridge to shut down. Calling this on a closing or closed
    /// bridge does nothing.
    pub fn close(&self) {
        if !self.shared.cancel.send_replace(true) {
            tracing::debug!("bridge close requested");
        }
    }

    /// Bytes forwarded from the socket to the stream so far.
    pub fn bytes_in(&self) -> u64 {
        self.shared.bytes_in.load(Ordering::Relaxed)
    }

    /// Bytes forwarded from the stream to the socket so far.
    pub fn bytes_out(&self) -> u64 {
        self.shared.bytes_out.load(Ordering::Relaxed)
    }
}

/// One replication session. See the module docs.
pub struct Bridge {
    config: BridgeConfig,
    shared: Arc<Shared>,
}

impl Bridge {
    /// Create a bridge in the [`BridgeState::Open`] state.
    pub fn new(config: BridgeConfig) -> (Self, BridgeHandle) {
        let (state, _) = watch::channel(BridgeState::Open);
        let (cancel, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state,
            cancel,
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        });

        let handle = BridgeHandle {
            shared: shared.clone(),
        };
        (Self { config, shared }, handle)
    }

    /// Run the session to completion.
    ///
    /// `sink` and `source` are the two halves of the socket; `source`
    /// ending is the socket's end of input. The state becomes `Closed` as
    /// soon as the session ends; this returns once both transports have
    /// been released.
    pub async fn run<Tx, Rx, E, S>(self, mut sink: Tx, mut source: Rx, stream: S) -> BridgeReport
    where
        Tx: Sink<Bytes> + Unpin,
        Tx::Error: Into<BoxError>,
        Rx: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
        S: AsyncRead + AsyncWrite,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let (reason, error) = {
            let inbound = pump_inbound(&mut source, &mut writer, &self.shared);
            let outbound = pump_outbound(
                &mut reader,
                &mut sink,
                self.config.chunk_size,
                &self.shared,
            );
            let cancelled = cancelled(self.shared.cancel.subscribe());
            tokio::pin!(inbound, outbound, cancelled);

            let mut inbound_done = false;
            let mut outbound_done = false;

            loop {
                if inbound_done && outbound_done {
                    break (CloseReason::Completed, None);
                }

                tokio::select! {
                    result = &mut inbound, if !inbound_done => match result {
                        Ok(()) => {
                            inbound_done = true;
                            if !outbound_done {
                                self.shared.transition(BridgeState::HalfClosedBySocket);
                            }
                        }
                        Err(err) => break (err.reason(), Some(err)),
                    },
                    result = &mut outbound, if !outbound_done => match result {
                        Ok(()) => {
                            outbound_done = true;
                            if !inbound_done {
                                self.shared.transition(BridgeState::HalfClosedByStream);
                            }
                        }
                        Err(err) => break (err.reason(), Some(err)),
                    },
                    _ = &mut cancelled => break (CloseReason::Cancelled, None),
                }
            }
        };

        self.shared.transition(BridgeState::Closed);

        if reason != CloseReason::Completed {
            let _ = tokio::time::timeout(self.config.close_grace, async {
                let _ = sink.close().await;
                let _ = writer.shutdown().await;
            })
            .await;
        }

        drop(sink);
        drop(source);
        drop(reader);
        drop(writer);

        BridgeReport {
            bytes_in: self.shared.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.shared.bytes_out.load(Ordering::Relaxed),
            reason,
            error,
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // A bridge dropped mid-run still ends up closed.
        self.shared.transition(BridgeState::Closed);
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancel| *cancel).await;
}

/// Socket to stream. Shuts the stream's write side down when the socket
/// ends.
async fn pump_inbound<Rx, E, W>(
    source: &mut Rx,
    writer: &mut W,
    shared: &Shared,
) -> Result<(), BridgeError>
where
    Rx: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
    W: AsyncWrite + Unpin,
{
    while let Some(message) = source.next().await {
        let chunk = message.map_err(BridgeError::socket)?;
        if chunk.is_empty() {
            continue;
        }
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        shared
            .bytes_in
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    writer.shutdown().await?;
    Ok(())
}

/// Stream to socket. Closes the sink when the stream ends.
async fn pump_outbound<R, Tx>(
    reader: &mut R,
    sink: &mut Tx,
    chunk_size: usize,
    shared: &Shared,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
    Tx: Sink<Bytes> + Unpin,
    Tx::Error: Into<BoxError>,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.send(Bytes::copy_from_slice(&buf[..n]))
            .await
            .map_err(BridgeError::socket)?;
        shared.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    sink.close().await.map_err(BridgeError::socket)?;
    Ok(())
}
