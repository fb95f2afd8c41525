//! Viewer side of a broker connection.
//!
//! A viewer connects once, sends a single subscribe message naming the update
//! types it renders, and from then on only receives. Undecodable frames are
//! logged and skipped; the session ends when the broker closes the socket.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use stopcast_protocol::{encode_frame, FrameDecoder, UpdatePayload, UpdateType, WireMessage};

use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::iter::UpdateIterator;

/// Totals for a finished viewer session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Updates handed to the render callback
    pub updates_rendered: u64,
    /// Frames dropped because they could not be decoded
    pub decode_failures: u64,
}

/// A subscribed connection to the broker.
pub struct Subscriber {
    stream: UnixStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    types: BTreeSet<UpdateType>,
    decode_failures: u64,
    closed: bool,
}

impl Subscriber {
    /// Connect to the broker and subscribe to `types`.
    ///
    /// Retries according to `connect_attempts`/`connect_retry_interval`.
    pub fn connect<I>(config: &ViewerConfig, types: I) -> Result<Self>
    where
        I: IntoIterator<Item = UpdateType>,
    {
        let types: BTreeSet<UpdateType> = types.into_iter().collect();
        let mut stream = connect_with_retry(config)?;

        let frame = encode_frame(&WireMessage::Subscribe {
            for_types: types.clone(),
        })?;
        stream.write_all(&frame)?;

        debug!(types = ?types, "Subscribed to broker");
        info!("Waiting for an update from the debugger");

        Ok(Self {
            stream,
            decoder: FrameDecoder::new(config.max_frame_len),
            read_buf: vec![0; config.read_chunk_size.max(1)],
            types,
            decode_failures: 0,
            closed: false,
        })
    }

    /// The update types this connection subscribed to.
    pub fn types(&self) -> &BTreeSet<UpdateType> {
        &self.types
    }

    /// Frames skipped so far because they failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Bound how long [`recv`](Self::recv) blocks; `None` blocks indefinitely.
    ///
    /// An expired wait surfaces as [`ViewerError::Io`] with kind `WouldBlock`
    /// or `TimedOut`; the connection remains usable.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Block until the next update.
    ///
    /// Returns `Ok(None)` once the broker has closed the connection.
    pub fn recv(&mut self) -> Result<Option<UpdatePayload>> {
        loop {
            while let Some(result) = self.decoder.next_frame() {
                match result {
                    Ok(WireMessage::Update(payload)) => return Ok(Some(payload)),
                    Ok(other) => {
                        warn!(kind = other.kind(), "Ignoring unexpected message from broker");
                    }
                    Err(e) => {
                        self.decode_failures += 1;
                        warn!(
                            error = %e,
                            total_failures = self.decode_failures,
                            "Dropping undecodable update"
                        );
                    }
                }
            }

            if self.closed {
                return Ok(None);
            }

            match self.stream.read(&mut self.read_buf) {
                Ok(0) => self.closed = true,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => self.closed = true,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive updates until the broker goes away, rendering each one.
    ///
    /// `render` is called synchronously with each update's type and payload.
    pub fn run<F>(mut self, mut render: F) -> Result<SessionSummary>
    where
        F: FnMut(UpdateType, &UpdatePayload),
    {
        let mut summary = SessionSummary::default();

        while let Some(update) = self.recv()? {
            render(update.update_type(), &update);
            summary.updates_rendered += 1;
        }

        summary.decode_failures = self.decode_failures;
        info!(
            updates = summary.updates_rendered,
            "Lost connection to the debugger"
        );
        Ok(summary)
    }

    /// Move the connection to a reader thread and iterate over its updates.
    pub fn into_updates(self) -> Result<UpdateIterator> {
        UpdateIterator::spawn(self)
    }

    pub(crate) fn try_clone_stream(&self) -> Result<UnixStream> {
        Ok(self.stream.try_clone()?)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("types", &self.types)
            .field("decode_failures", &self.decode_failures)
            .field("closed", &self.closed)
            .finish()
    }
}

fn connect_with_retry(config: &ViewerConfig) -> Result<UnixStream> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match UnixStream::connect(&config.socket_path) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if let Some(max) = config.connect_attempts {
                    if attempt >= max.max(1) {
                        return Err(ViewerError::Connect {
                            path: config.socket_path.clone(),
                            source: e,
                        });
                    }
                }
                debug!(
                    attempt,
                    socket = %config.socket_path.display(),
                    "Broker not reachable yet: {}", e
                );
                thread::sleep(config.connect_retry_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use stopcast_protocol::{decode_frame, FRAME_HEADER_LEN};

    fn listen() -> (tempfile::TempDir, UnixListener, ViewerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (dir, listener, ViewerConfig::default().with_socket_path(path))
    }

    fn read_frame(stream: &mut UnixStream) -> WireMessage {
        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header).unwrap();
        let mut body = vec![0; u32::from_be_bytes(header) as usize];
        stream.read_exact(&mut body).unwrap();
        decode_frame(&[header.to_vec(), body].concat()).unwrap()
    }

    fn update(payload: UpdatePayload) -> Vec<u8> {
        encode_frame(&WireMessage::Update(payload)).unwrap()
    }

    #[test]
    fn test_connect_sends_one_subscription() {
        let (_dir, listener, config) = listen();

        let subscriber = Subscriber::connect(&config, [UpdateType::Stack, UpdateType::Register]).unwrap();
        let (mut broker_side, _) = listener.accept().unwrap();

        assert_eq!(
            read_frame(&mut broker_side),
            WireMessage::subscribe([UpdateType::Register, UpdateType::Stack])
        );
        assert_eq!(subscriber.types().len(), 2);
    }

    #[test]
    fn test_connect_without_broker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::default()
            .with_socket_path(dir.path().join("missing.sock"))
            .with_retry(2, Duration::from_millis(10));

        let err = Subscriber::connect(&config, [UpdateType::Disasm]).unwrap_err();
        assert!(matches!(err, ViewerError::Connect { .. }));
    }

    #[test]
    fn test_connect_retries_until_broker_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        let config = ViewerConfig::default()
            .with_socket_path(&path)
            .with_retry(50, Duration::from_millis(20));

        let broker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let listener = UnixListener::bind(&path).unwrap();
            let (stream, _) = listener.accept().unwrap();
            stream
        });

        let subscriber = Subscriber::connect(&config, [UpdateType::Backtrace]);
        assert!(subscriber.is_ok());
        broker.join().unwrap();
    }

    #[test]
    fn test_run_renders_until_close_and_skips_garbage() {
        let (_dir, listener, config) = listen();
        let subscriber = Subscriber::connect(&config, [UpdateType::Disasm]).unwrap();
        let (mut broker_side, _) = listener.accept().unwrap();
        read_frame(&mut broker_side);

        let mut bytes = update(UpdatePayload::Disasm("nop".into()));
        bytes.extend_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(b"{oops");
        bytes.extend(update(UpdatePayload::Disasm("ret".into())));
        broker_side.write_all(&bytes).unwrap();
        drop(broker_side);

        let mut rendered = Vec::new();
        let summary = subscriber
            .run(|update_type, payload| rendered.push((update_type, payload.clone())))
            .unwrap();

        assert_eq!(
            rendered,
            vec![
                (UpdateType::Disasm, UpdatePayload::Disasm("nop".into())),
                (UpdateType::Disasm, UpdatePayload::Disasm("ret".into())),
            ]
        );
        assert_eq!(
            summary,
            SessionSummary {
                updates_rendered: 2,
                decode_failures: 1
            }
        );
    }

    #[test]
    fn test_update_split_across_reads() {
        let (_dir, listener, config) = listen();
        let mut subscriber = Subscriber::connect(&config, [UpdateType::Backtrace]).unwrap();
        let (mut broker_side, _) = listener.accept().unwrap();
        read_frame(&mut broker_side);

        // Larger than a single read chunk.
        let backtrace = "#0 frame\n".repeat(20_000);
        let frame = update(UpdatePayload::Backtrace(backtrace.clone()));
        let writer = thread::spawn(move || {
            for chunk in frame.chunks(10_000) {
                broker_side.write_all(chunk).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
            broker_side
        });

        assert_eq!(
            subscriber.recv().unwrap(),
            Some(UpdatePayload::Backtrace(backtrace))
        );
        drop(writer.join().unwrap());
        assert_eq!(subscriber.recv().unwrap(), None);
    }

    #[test]
    fn test_read_timeout_leaves_connection_usable() {
        let (_dir, listener, config) = listen();
        let mut subscriber = Subscriber::connect(&config, [UpdateType::Stack]).unwrap();
        let (mut broker_side, _) = listener.accept().unwrap();
        read_frame(&mut broker_side);

        subscriber
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        assert!(matches!(subscriber.recv(), Err(ViewerError::Io(_))));

        broker_side
            .write_all(&update(UpdatePayload::Disasm("nop".into())))
            .unwrap();
        assert_eq!(
            subscriber.recv().unwrap(),
            Some(UpdatePayload::Disasm("nop".into()))
        );
    }
}
