//! Registry of live replication sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fieldsync_store::PublicId;

use crate::bridge::{BridgeHandle, BridgeState};

/// A live replication session.
pub struct Session {
    pub id: u64,
    pub project: PublicId,
    pub started_at: Instant,
    handle: BridgeHandle,
}

impl Session {
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Snapshot of a session for reporting.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub project: PublicId,
    pub state: BridgeState,
    pub age: Duration,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Tracks every running bridge.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Session>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session and return its id.
    pub fn register(&self, project: PublicId, handle: BridgeHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id,
            Session {
                id,
                project,
                started_at: Instant::now(),
                handle,
            },
        );
        id
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: u64) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of every live session.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo {
                id: entry.id,
                project: entry.project,
                state: entry.handle.state(),
                age: entry.age(),
                bytes_in: entry.handle.bytes_in(),
                bytes_out: entry.handle.bytes_out(),
            })
            .collect()
    }

    /// Ask every live bridge to close and wait up to `timeout` for them to
    /// finish. Returns how many sessions were still open when the wait
    /// ended.
    pub async fn close_all(&self, timeout: Duration) -> usize {
        let handles: Vec<BridgeHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();

        for handle in &handles {
            handle.close();
        }

        let wait_all = futures::future::join_all(handles.iter().map(|h| h.closed()));
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            tracing::warn!("timed out waiting for sessions to close");
        }

        handles
            .iter()
            .filter(|h| h.state() != BridgeState::Closed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Bridge, BridgeConfig};

    #[test]
    fn test_register_and_remove() {
        let registry = SessionRegistry::new();
        let a = PublicId::from_bytes([1; 32]);
        let b = PublicId::from_bytes([2; 32]);

        let (_bridge1, h1) = Bridge::new(BridgeConfig::default());
        let (_bridge2, h2) = Bridge::new(BridgeConfig::default());
        let (_bridge3, h3) = Bridge::new(BridgeConfig::default());
        let s1 = registry.register(a, h1);
        registry.register(a, h2);
        registry.register(b, h3);

        assert_eq!(registry.count(), 3);

        assert!(registry.remove(s1));
        assert!(!registry.remove(s1));
        assert_eq!(registry.count(), 2);

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|s| s.project == a).count(), 1);
        assert_eq!(listed.iter().filter(|s| s.project == b).count(), 1);
        assert!(listed.iter().all(|s| s.state == BridgeState::Open));
        assert!(listed.iter().all(|s| s.bytes_in == 0 && s.bytes_out == 0));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new();
        let project = PublicId::from_bytes([1; 32]);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let (client_tx, source) =
                futures::channel::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(0);
            let (sink, _client_rx) = futures::channel::mpsc::channel::<bytes::Bytes>(0);
            let (bridge_end, store_end) = tokio::io::duplex(1024);
            let (bridge, handle) = Bridge::new(BridgeConfig::default());
            registry.register(project, handle);
            tasks.push((
                tokio::spawn(bridge.run(sink, source, bridge_end)),
                client_tx,
                store_end,
            ));
        }

        let still_open = registry.close_all(Duration::from_secs(5)).await;
        assert_eq!(still_open, 0);
        for (task, _client_tx, _store_end) in tasks {
            task.await.unwrap();
        }
    }
}
