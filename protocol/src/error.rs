//! Error types for the stopcast wire protocol.

/// Errors produced while turning bytes back into a [`WireMessage`](crate::WireMessage).
///
/// None of these are fatal for a connection: callers log the error, drop the
/// offending frame and keep reading.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame body is not a valid message (bad JSON, unknown `msg_type`,
    /// unknown `update_type`, wrong payload shape)
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A frame header announced more bytes than the decoder accepts
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Length announced by the frame header
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Fewer bytes were supplied than the frame header announced
    #[error("Truncated frame: expected {expected} bytes, {available} available")]
    Truncated {
        /// Bytes the frame needs, header included
        expected: usize,
        /// Bytes actually supplied
        available: usize,
    },
}

/// Errors produced while encoding a message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// serde_json refused the value
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The encoded body does not fit in a frame
    #[error("Encoded message of {len} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { len: usize, max: usize },
}
