//! Store configuration.

use std::path::PathBuf;

/// Default capacity of each in-memory replication pipe, in bytes.
pub const DEFAULT_STREAM_BUFFER: usize = 256 * 1024;

/// Default number of chunks a session may fall behind the fan-out before it
/// is disconnected.
pub const DEFAULT_FANOUT_CAPACITY: usize = 1024;

/// Configuration for a [`LocalStore`](crate::LocalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for the sled database. `None` opens a temporary database.
    pub path: Option<PathBuf>,

    /// Capacity of each replication pipe handed to a session.
    pub stream_buffer_size: usize,

    /// Fan-out buffer length (in chunks) per project.
    pub fanout_capacity: usize,

    /// sled page cache size in bytes.
    pub cache_capacity: u64,
}

impl StoreConfig {
    /// Create a configuration persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::temporary()
        }
    }

    /// Create a configuration for a throwaway database.
    pub fn temporary() -> Self {
        Self {
            path: None,
            stream_buffer_size: DEFAULT_STREAM_BUFFER,
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
            cache_capacity: 64 * 1024 * 1024,
        }
    }

    /// Set the replication pipe capacity.
    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size.max(1);
        self
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new().cache_capacity(self.cache_capacity);
        match &self.path {
            Some(path) => config.path(path),
            None => config.temporary(true),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::temporary()
    }
}
