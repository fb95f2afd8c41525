//! Viewer connection settings

use std::path::PathBuf;
use std::time::Duration;

use stopcast_protocol::{DEFAULT_MAX_FRAME_LEN, READ_CHUNK_SIZE};

/// Socket path used when nothing else is configured; matches the broker's.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/stopcast.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "STOPCAST_SOCKET";

/// Configuration for a viewer's connection to the broker
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Filesystem path of the broker's socket
    /// Default: /tmp/stopcast.sock
    pub socket_path: PathBuf,

    /// Bytes requested per read call
    /// Default: 64 KiB
    pub read_chunk_size: usize,

    /// Largest update frame accepted from the broker
    /// Default: 16 MiB
    pub max_frame_len: usize,

    /// Pause between failed connection attempts
    /// Default: 1 second
    pub connect_retry_interval: Duration,

    /// Connection attempts before giving up; `None` retries until the broker
    /// appears
    /// Default: Some(1)
    pub connect_attempts: Option<u32>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            read_chunk_size: READ_CHUNK_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_retry_interval: Duration::from_secs(1),
            connect_attempts: Some(1),
        }
    }
}

impl ViewerConfig {
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

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Keep retrying until a broker is listening
    pub fn wait_for_broker(mut self) -> Self {
        self.connect_attempts = None;
        self
    }

    /// Retry up to `attempts` times, `interval` apart
    pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.connect_attempts = Some(attempts);
        self.connect_retry_interval = interval;
        self
    }
}
