//! Error types for stopcast viewers.

use std::io;
use std::path::PathBuf;

use stopcast_protocol::EncodeError;

/// Errors a viewer can hit while talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// No broker accepted the connection within the configured attempts
    #[error("Failed to connect to broker at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    /// The subscribe message could not be encoded
    #[error("Failed to encode subscription: {0}")]
    Encode(#[from] EncodeError),
}

/// Result type for viewer operations
pub type Result<T> = std::result::Result<T, ViewerError>;
