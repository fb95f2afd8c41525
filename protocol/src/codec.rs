//! Length-delimited JSON framing.
//!
//! A frame is a 4-byte big-endian body length followed by the JSON encoding of
//! one [`WireMessage`]. Sockets are read in chunks of at most
//! [`READ_CHUNK_SIZE`] bytes and fed to a [`FrameDecoder`], which reassembles
//! frames that span several reads and splits reads that carry several frames.

use bytes::{Buf, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::message::WireMessage;

/// Upper bound on the bytes requested from a socket by one read call.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame body accepted by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize a message body (no length prefix).
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Deserialize a message body (no length prefix).
///
/// Fails on anything that is not exactly one well-formed message; partial or
/// trailing data is never accepted.
pub fn decode(body: &[u8]) -> Result<WireMessage, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}

/// Serialize a message into a complete frame.
pub fn encode_frame(msg: &WireMessage) -> Result<Vec<u8>, EncodeError> {
    let body = encode(msg)?;
    let len = u32::try_from(body.len()).map_err(|_| EncodeError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one complete frame held entirely in `frame`.
pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, DecodeError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: FRAME_HEADER_LEN,
            available: frame.len(),
        });
    }

    let len = body_len(frame);
    let expected = FRAME_HEADER_LEN + len;
    if frame.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            available: frame.len(),
        });
    }

    decode(&frame[FRAME_HEADER_LEN..expected])
}

fn body_len(buf: &[u8]) -> usize {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

/// Incremental frame decoder fed with raw socket reads.
///
/// ```
/// use stopcast_protocol::{encode_frame, FrameDecoder, UpdateType, WireMessage};
///
/// let frame = encode_frame(&WireMessage::subscribe([UpdateType::Stack])).unwrap();
/// let mut decoder = FrameDecoder::default();
///
/// decoder.extend(&frame[..3]);
/// assert!(decoder.next_frame().is_none());
///
/// decoder.extend(&frame[3..]);
/// let msg = decoder.next_frame().unwrap().unwrap();
/// assert_eq!(msg, WireMessage::subscribe([UpdateType::Stack]));
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    /// Bytes of a rejected oversized frame still to arrive and be dropped
    skip: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// Create a decoder rejecting frame bodies longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_frame_len,
            skip: 0,
        }
    }

    /// Append bytes read from the socket.
    pub fn extend(&mut self, mut bytes: &[u8]) {
        if self.skip > 0 {
            let dropped = self.skip.min(bytes.len());
            self.skip -= dropped;
            bytes = &bytes[dropped..];
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` while the buffered bytes do not yet hold a whole frame.
    /// A malformed body consumes exactly its own frame, so decoding resumes
    /// with the next one. A frame whose length prefix exceeds the limit is
    /// reported once and then dropped without being buffered, including the
    /// part of its body still to arrive; decoding resumes at the frame after it.
    pub fn next_frame(&mut self) -> Option<Result<WireMessage, DecodeError>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }

        let len = body_len(&self.buf);
        if len > self.max_frame_len {
            let total = FRAME_HEADER_LEN + len;
            if self.buf.len() >= total {
                self.buf.advance(total);
            } else {
                self.skip = total - self.buf.len();
                self.buf.clear();
            }
            return Some(Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }));
        }

        if self.buf.len() < FRAME_HEADER_LEN + len {
            return None;
        }

        self.buf.advance(FRAME_HEADER_LEN);
        let body = self.buf.split_to(len);
        Some(decode(&body))
    }
}
