//! Per-project replication hub.
//!
//! Each project has one hub. A hub keeps an append-only chunk log in its own
//! sled tree (keys are big-endian sequence numbers) and a broadcast channel
//! that fans new chunks out to every live session.
//!
//! A session is one in-memory duplex pipe. The hub drives the far end:
//! - on open, every logged chunk is replayed in sequence order
//! - afterwards, chunks read from the session are logged and broadcast
//! - broadcast chunks from *other* sessions are written to the session
//!
//! Replay and live delivery never overlap or leave a gap: the subscription
//! and the replay bound are taken under the same lock that orders appends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sled::Tree;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{StoreError, StoreResult};
use crate::types::PublicId;

/// Largest chunk read from a session in one go.
const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone)]
struct Chunk {
    origin: u64,
    data: Bytes,
}

/// Why a session's hub task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The session shut down its input.
    InputClosed,
    /// The session fell behind the fan-out buffer.
    Lagged(u64),
    /// The session's pipe was dropped or failed.
    PipeClosed,
}

/// Replication hub for one project.
pub struct ReplicationHub {
    public_id: PublicId,
    log: Tree,
    last_seq: AtomicU64,
    append_lock: Mutex<()>,
    fanout: broadcast::Sender<Chunk>,
    next_session: AtomicU64,
    stream_buffer_size: usize,
}

impl ReplicationHub {
    /// Open the hub for a project over its log tree.
    pub(crate) fn open(
        public_id: PublicId,
        log: Tree,
        stream_buffer_size: usize,
        fanout_capacity: usize,
    ) -> StoreResult<Self> {
        let last_seq = Self::load_last_seq(&log)?;
        let (fanout, _) = broadcast::channel(fanout_capacity);

        Ok(Self {
            public_id,
            log,
            last_seq: AtomicU64::new(last_seq),
            append_lock: Mutex::new(()),
            fanout,
            next_session: AtomicU64::new(1),
            stream_buffer_size,
        })
    }

    fn load_last_seq(log: &Tree) -> StoreResult<u64> {
        match log.last()? {
            Some((key, _)) => {
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    StoreError::InvalidData(format!("bad log key length {}", key.len()))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Number of chunks in the log.
    pub fn log_len(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Number of sessions currently attached.
    pub fn live_sessions(&self) -> usize {
        self.fanout.receiver_count()
    }

    /// Open a new session, returning the session's end of the pipe.
    pub(crate) fn open_session(self: &Arc<Self>) -> DuplexStream {
        let (client, peer) = tokio::io::duplex(self.stream_buffer_size);
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);

        let (feed, replay_to) = {
            let _guard = self.append_lock.lock();
            (self.fanout.subscribe(), self.last_seq.load(Ordering::SeqCst))
        };

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let end = hub.serve(session, peer, feed, replay_to).await;
            match end {
                Ok(reason) => tracing::debug!(
                    project = %hub.public_id,
                    session,
                    ?reason,
                    "replication session ended"
                ),
                Err(e) => tracing::warn!(
                    project = %hub.public_id,
                    session,
                    error = %e,
                    "replication session failed"
                ),
            }
        });

        client
    }

    fn append(&self, origin: u64, data: Bytes) -> StoreResult<u64> {
        let _guard = self.append_lock.lock();
        let seq = self.last_seq.load(Ordering::SeqCst) + 1;
        self.log.insert(seq.to_be_bytes(), data.as_ref())?;
        self.last_seq.store(seq, Ordering::SeqCst);
        // No receivers is fine: nobody else is connected.
        let _ = self.fanout.send(Chunk { origin, data });
        Ok(seq)
    }

    async fn serve(
        &self,
        session: u64,
        peer: DuplexStream,
        mut feed: broadcast::Receiver<Chunk>,
        replay_to: u64,
    ) -> StoreResult<SessionEnd> {
        let (mut reader, mut writer) = tokio::io::split(peer);

        for entry in self.log.range(..=replay_to.to_be_bytes()) {
            let (_, value) = entry?;
            if writer.write_all(&value).await.is_err() {
                return Ok(SessionEnd::PipeClosed);
            }
        }
        tracing::trace!(project = %self.public_id, session, replayed = replay_to, "replay done");

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => return Ok(SessionEnd::InputClosed),
                        Ok(n) => n,
                        Err(_) => return Ok(SessionEnd::PipeClosed),
                    };
                    self.append(session, Bytes::copy_from_slice(&buf[..n]))?;
                }
                chunk = feed.recv() => match chunk {
                    Ok(chunk) if chunk.origin == session => {}
                    Ok(chunk) => {
                        if writer.write_all(&chunk.data).await.is_err() {
                            return Ok(SessionEnd::PipeClosed);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => return Ok(SessionEnd::Lagged(missed)),
                    Err(RecvError::Closed) => return Ok(SessionEnd::PipeClosed),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub(fanout: usize) -> Arc<ReplicationHub> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("replication:test").unwrap();
        Arc::new(ReplicationHub::open(PublicId::from_bytes([7; 32]), tree, 4096, fanout).unwrap())
    }

    async fn read_exact(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_fanout_skips_origin() {
        let hub = hub(16);
        let mut a = hub.open_session();
        let mut b = hub.open_session();
        assert_eq!(hub.live_sessions(), 2);

        a.write_all(b"hello").await.unwrap();
        assert_eq!(read_exact(&mut b, 5).await, b"hello");

        b.write_all(b"world").await.unwrap();
        assert_eq!(read_exact(&mut a, 5).await, b"world");
    }

    #[tokio::test]
    async fn test_new_session_replays_log() {
        let hub = hub(16);
        let mut a = hub.open_session();
        let mut watcher = hub.open_session();

        // A chunk reaching another live session has been logged.
        a.write_all(b"one").await.unwrap();
        assert_eq!(read_exact(&mut watcher, 3).await, b"one");
        a.write_all(b"two").await.unwrap();
        assert_eq!(read_exact(&mut watcher, 3).await, b"two");
        assert!(hub.log_len() >= 1);

        let mut late = hub.open_session();
        // Chunk boundaries are not preserved by the pipe, bytes are.
        let bytes = read_exact(&mut late, 6).await;
        assert_eq!(bytes, b"onetwo");
    }

    #[tokio::test]
    async fn test_input_shutdown_ends_stream() {
        let hub = hub(16);
        let mut a = hub.open_session();
        a.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), a.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_last_seq_survives_reopen() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("replication:test").unwrap();
        tree.insert(3u64.to_be_bytes(), b"x".as_ref()).unwrap();
        let hub = ReplicationHub::open(PublicId::from_bytes([1; 32]), tree, 64, 4).unwrap();
        assert_eq!(hub.log_len(), 3);
    }
}
