//! One accepted viewer connection.
//!
//! All socket access here is non-blocking: reads take what the kernel has
//! buffered, up to a fixed number of reads per pass, writes push as much of the backlog as the socket takes and leave
//! the rest for a later loop iteration.

use std::collections::BTreeSet;
use std::fmt;
use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::Interest;
use tokio::net::UnixStream;
use tracing::{debug, trace, warn};

use stopcast_protocol::{FrameDecoder, UpdateType, WireMessage};

use crate::config::BrokerConfig;
use crate::error::ConnectionError;

/// Reads taken from one socket per loop pass; the rest waits for the next pass
const MAX_READS_PER_PASS: usize = 16;

/// Opaque handle identifying a connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Connection lifecycle. `Closing` connections are removed by the loop on
/// its next pass; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// What a read pass produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReadOutcome {
    /// Subscriptions received, in arrival order
    pub subscriptions: Vec<BTreeSet<UpdateType>>,
    /// Frames that failed to decode
    pub decode_failures: u64,
}

pub(crate) struct Connection {
    id: ConnectionId,
    stream: UnixStream,
    state: ConnectionState,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    outbound: BytesMut,
    max_pending_bytes: usize,
    decode_failures: u64,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, stream: UnixStream, config: &BrokerConfig) -> Self {
        Self {
            id,
            stream,
            state: ConnectionState::Open,
            decoder: FrameDecoder::new(config.max_frame_len),
            read_buf: vec![0; config.read_chunk_size],
            outbound: BytesMut::new(),
            max_pending_bytes: config.max_pending_bytes,
            decode_failures: 0,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    /// Resolves when the socket is readable, or writable while a backlog is
    /// waiting.
    pub(crate) async fn ready(&self) {
        let interest = if self.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        // Errors surface again on the next read or write.
        let _ = self.stream.ready(interest).await;
    }

    /// Read what is currently available, at most [`MAX_READS_PER_PASS`]
    /// chunks, and decode complete frames.
    ///
    /// Data left in the socket keeps it readable for the next pass, so a
    /// viewer that writes without pause cannot stall the loop. Undecodable frames are logged and skipped; the connection stays open.
    /// Update messages from a viewer are ignored. End of stream or a socket
    /// error moves the connection to `Closing`.
    pub(crate) fn on_readable(&mut self) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        if !self.is_open() {
            return outcome;
        }

        let mut reads = 0;
        while reads < MAX_READS_PER_PASS {
            match self.stream.try_read(&mut self.read_buf) {
                Ok(0) => {
                    debug!(connection = %self.id, "Viewer closed the connection");
                    self.state = ConnectionState::Closing;
                    break;
                }
                Ok(n) => {
                    reads += 1;
                    trace!(connection = %self.id, bytes = n, "Read from viewer");
                    self.decoder.extend(&self.read_buf[..n]);
                    self.decode_frames(&mut outcome);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(ConnectionError::Io(e));
                    break;
                }
            }
        }

        outcome
    }

    fn decode_frames(&mut self, outcome: &mut ReadOutcome) {
        while let Some(result) = self.decoder.next_frame() {
            match result {
                Ok(WireMessage::Subscribe { for_types }) => {
                    debug!(connection = %self.id, types = ?for_types, "Viewer subscribed");
                    outcome.subscriptions.push(for_types);
                }
                Ok(other) => {
                    warn!(
                        connection = %self.id,
                        kind = other.kind(),
                        "Ignoring unexpected message from viewer"
                    );
                }
                Err(e) => {
                    self.decode_failures += 1;
                    outcome.decode_failures += 1;
                    warn!(
                        connection = %self.id,
                        error = %e,
                        total_failures = self.decode_failures,
                        "Dropping undecodable message from viewer"
                    );
                }
            }
        }
    }

    /// Queue an encoded frame and try to write it out.
    pub(crate) fn send(&mut self, frame: &[u8]) {
        if !self.is_open() {
            return;
        }

        self.outbound.extend_from_slice(frame);
        if self.outbound.len() > self.max_pending_bytes {
            self.fail(ConnectionError::SlowConsumer {
                pending: self.outbound.len(),
                limit: self.max_pending_bytes,
            });
            return;
        }

        self.flush();
    }

    /// Write as much of the backlog as the socket accepts without blocking.
    pub(crate) fn flush(&mut self) {
        while self.is_open() && !self.outbound.is_empty() {
            match self.stream.try_write(&self.outbound) {
                Ok(0) => {
                    self.fail(ConnectionError::Io(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => self.fail(ConnectionError::Io(e)),
            }
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        debug!(connection = %self.id, %error, "Closing viewer connection");
        self.state = ConnectionState::Closing;
        self.outbound.clear();
    }

    /// Release the backlog; the socket closes when the connection is dropped.
    pub(crate) fn close(&mut self) {
        self.outbound.clear();
        self.state = ConnectionState::Closed;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_bytes", &self.pending_bytes())
            .field("decode_failures", &self.decode_failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stopcast_protocol::{encode_frame, UpdatePayload};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn connection(stream: UnixStream, config: &BrokerConfig) -> Connection {
        Connection::new(ConnectionId::new(1), stream, config)
    }

    async fn read_once(conn: &mut Connection) -> ReadOutcome {
        tokio::time::timeout(Duration::from_secs(1), conn.ready())
            .await
            .expect("connection never became ready");
        conn.on_readable()
    }

    #[tokio::test]
    async fn test_subscribe_frames_are_reported_in_order() {
        let (server, mut viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());

        let mut bytes = encode_frame(&WireMessage::subscribe([UpdateType::Register])).unwrap();
        bytes.extend(encode_frame(&WireMessage::subscribe([UpdateType::Stack])).unwrap());
        viewer.write_all(&bytes).await.unwrap();

        let outcome = read_once(&mut conn).await;
        assert_eq!(
            outcome.subscriptions,
            vec![
                [UpdateType::Register].into_iter().collect(),
                [UpdateType::Stack].into_iter().collect(),
            ]
        );
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_chatty_viewer_is_read_over_several_passes() {
        let (server, mut viewer) = UnixStream::pair().unwrap();
        let config = BrokerConfig {
            read_chunk_size: 16,
            ..Default::default()
        };
        let mut conn = connection(server, &config);

        let frame = encode_frame(&WireMessage::subscribe(UpdateType::ALL)).unwrap();
        let frames = 2 * MAX_READS_PER_PASS * 16 / frame.len() + 1;
        viewer.write_all(&frame.repeat(frames)).await.unwrap();

        let first = read_once(&mut conn).await;
        assert!(
            first.subscriptions.len() < frames,
            "one pass consumed all {frames} frames"
        );

        let mut received = first.subscriptions.len();
        let mut passes = 1;
        while received < frames {
            received += read_once(&mut conn).await.subscriptions.len();
            passes += 1;
        }
        assert_eq!(received, frames);
        assert!(passes >= 2);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_garbage_is_dropped_and_connection_stays_open() {
        let (server, mut viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());

        let mut bytes = 9u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"not json!");
        bytes.extend(encode_frame(&WireMessage::subscribe([UpdateType::Disasm])).unwrap());
        viewer.write_all(&bytes).await.unwrap();

        let outcome = read_once(&mut conn).await;
        assert_eq!(outcome.decode_failures, 1);
        assert_eq!(outcome.subscriptions.len(), 1);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_update_from_viewer_is_ignored() {
        let (server, mut viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());

        let frame = encode_frame(&WireMessage::Update(UpdatePayload::Disasm("nop".into()))).unwrap();
        viewer.write_all(&frame).await.unwrap();

        let outcome = read_once(&mut conn).await;
        assert_eq!(outcome, ReadOutcome::default());
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_peer_close_moves_to_closing() {
        let (server, viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());
        drop(viewer);

        read_once(&mut conn).await;
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_send_delivers_frames_in_order() {
        let (server, mut viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());

        let first = encode_frame(&WireMessage::Update(UpdatePayload::Backtrace("#0".into()))).unwrap();
        let second = encode_frame(&WireMessage::Update(UpdatePayload::Backtrace("#1".into()))).unwrap();
        conn.send(&first);
        conn.send(&second);
        assert_eq!(conn.pending_bytes(), 0);

        let mut received = vec![0; first.len() + second.len()];
        viewer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [first, second].concat());
    }

    #[tokio::test]
    async fn test_unread_viewer_is_evicted_past_backlog_limit() {
        let (server, _viewer) = UnixStream::pair().unwrap();
        let config = BrokerConfig {
            max_pending_bytes: 256 * 1024,
            ..Default::default()
        };
        let mut conn = connection(server, &config);

        let frame = encode_frame(&WireMessage::Update(UpdatePayload::Backtrace(
            "x".repeat(16 * 1024),
        )))
        .unwrap();

        // The viewer never reads: the kernel buffer fills, then the backlog.
        for _ in 0..1024 {
            conn.send(&frame);
            if !conn.is_open() {
                break;
            }
        }

        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(conn.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_ignores_sends() {
        let (server, _viewer) = UnixStream::pair().unwrap();
        let mut conn = connection(server, &BrokerConfig::default());
        conn.close();

        conn.send(b"\x00\x00\x00\x02{}");
        assert_eq!(conn.pending_bytes(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(3).to_string(), "client-3");
    }
}
