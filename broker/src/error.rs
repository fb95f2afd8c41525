//! Error types for the stopcast broker.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced to whoever drives the broker (the debugger command layer).
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The listening socket could not claim its path
    #[error("Failed to bind broker socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `start` was called while a broker is running
    #[error("Broker is already running")]
    AlreadyRunning,

    /// `stop` was called with no broker running
    #[error("Broker is not running")]
    NotRunning,

    /// The dispatch thread did not exit within the stop timeout; it may still be alive
    #[error("Failed to stop broker within {0:?}")]
    ShutdownTimeout(Duration),

    /// The dispatch thread could not be spawned
    #[error("Failed to spawn broker thread: {0}")]
    Spawn(#[source] io::Error),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Per-connection failures. These are logged and end the offending
/// connection; they never leave the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    /// The viewer stopped reading and its backlog outgrew the limit
    #[error("Viewer fell behind with {pending} unsent bytes (limit {limit})")]
    SlowConsumer { pending: usize, limit: usize },
}

/// Failures of the debugger-state source consulted on each stop.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// No inferior, no frame, or the debugger refused the request
    #[error("Debugger state unavailable: {0}")]
    Unavailable(String),

    /// Reading one piece of state failed
    #[error("Failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SourceError {
    /// Wrap an underlying error raised while reading `what`.
    pub fn read<E>(what: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        SourceError::Read {
            what,
            source: source.into(),
        }
    }
}

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
