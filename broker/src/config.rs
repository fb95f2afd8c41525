//! Configuration types for the stopcast broker
//!
//! This module defines the settings that control where the broker listens,
//! how long one loop iteration may wait, and the limits that keep a slow or
//! misbehaving viewer from affecting the others.

use std::path::PathBuf;
use std::time::Duration;

use stopcast_protocol::{DEFAULT_MAX_FRAME_LEN, READ_CHUNK_SIZE};

use crate::error::BrokerError;

/// Socket path used when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/stopcast.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "STOPCAST_SOCKET";

/// Configuration for the broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Filesystem path of the listening socket
    /// Default: /tmp/stopcast.sock
    pub socket_path: PathBuf,

    /// Longest a single loop iteration waits for activity before checking
    /// for a stop request
    /// Default: 100 milliseconds
    pub poll_interval: Duration,

    /// Bytes requested from a socket per read call
    /// Default: 64 KiB
    pub read_chunk_size: usize,

    /// Largest frame body accepted from a viewer
    /// Default: 16 MiB
    pub max_frame_len: usize,

    /// Unsent bytes a viewer may accumulate before it is disconnected
    /// Default: 8 MiB
    pub max_pending_bytes: usize,

    /// Queue capacity; `None` keeps every event, `Some(n)` drops the oldest
    /// event once `n` are waiting
    /// Default: None
    pub queue_capacity: Option<usize>,

    /// How long `stop` waits for the dispatch thread
    /// Default: 10 seconds
    pub stop_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            poll_interval: Duration::from_millis(100),
            read_chunk_size: READ_CHUNK_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_pending_bytes: 8 * 1024 * 1024,
            queue_capacity: None,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfig {
    /// Create a new BrokerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with the socket path taken from `STOPCAST_SOCKET`
    /// when set
    pub fn from_env() -> Self {
        match std::env::var_os(SOCKET_ENV) {
            Some(path) if !path.is_empty() => Self::default().with_socket_path(path),
            _ => Self::default(),
        }
    }

    /// Use a different socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Bound the event queue, dropping the oldest events past `capacity`
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(BrokerError::Configuration(
                "Socket path must not be empty".to_string(),
            ));
        }

        if self.poll_interval == Duration::ZERO {
            return Err(BrokerError::Configuration(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.read_chunk_size == 0 {
            return Err(BrokerError::Configuration(
                "Read chunk size must be greater than 0".to_string(),
            ));
        }

        if self.max_frame_len == 0 {
            return Err(BrokerError::Configuration(
                "Max frame length must be greater than 0".to_string(),
            ));
        }

        if self.max_pending_bytes == 0 {
            return Err(BrokerError::Configuration(
                "Max pending bytes must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == Some(0) {
            return Err(BrokerError::Configuration(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
