//! Blocking iterator over received updates
//!
//! Provides various iteration patterns for consuming updates:
//! - Blocking: `recv()`, `for update in iter`
//! - Non-blocking: `try_recv()`, `try_iter()`
//! - Timeout: `recv_timeout()`, `timeout_iter()`

use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use stopcast_protocol::UpdatePayload;

use crate::error::{Result, ViewerError};
use crate::subscriber::{SessionSummary, Subscriber};

/// Blocking iterator over updates from the broker
///
/// A background thread owns the [`Subscriber`] and forwards every update
/// over `std::sync::mpsc`. The channel closes when the broker disconnects.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use stopcast_protocol::UpdateType;
/// use stopcast_viewer::{Subscriber, ViewerConfig};
///
/// let updates = Subscriber::connect(&ViewerConfig::from_env(), [UpdateType::Register])?
///     .into_updates()?;
///
/// // Blocking iteration
/// for update in &updates {
///     println!("{:?}", update);
/// }
///
/// // With timeout
/// if let Some(update) = updates.recv_timeout(Duration::from_secs(1)) {
///     println!("Got update: {:?}", update);
/// }
/// # Ok::<(), stopcast_viewer::ViewerError>(())
/// ```
pub struct UpdateIterator {
    rx: mpsc::Receiver<UpdatePayload>,
    /// Used to unblock the reader thread on drop
    stream: UnixStream,
    reader: Option<JoinHandle<Result<SessionSummary>>>,
}

impl UpdateIterator {
    pub(crate) fn spawn(mut subscriber: Subscriber) -> Result<Self> {
        let stream = subscriber.try_clone_stream()?;
        let (tx, rx) = mpsc::channel();

        let reader = thread::Builder::new()
            .name("stopcast-viewer".to_string())
            .spawn(move || {
                let mut summary = SessionSummary::default();
                while let Some(update) = subscriber.recv()? {
                    if tx.send(update).is_err() {
                        debug!("Update iterator dropped, stopping reader");
                        break;
                    }
                    summary.updates_rendered += 1;
                }
                summary.decode_failures = subscriber.decode_failures();
                Ok(summary)
            })
            .map_err(ViewerError::Io)?;

        Ok(Self {
            rx,
            stream,
            reader: Some(reader),
        })
    }

    /// Block until the next update is available
    ///
    /// Returns `None` once the broker has disconnected and every received
    /// update has been consumed.
    pub fn recv(&self) -> Option<UpdatePayload> {
        self.rx.recv().ok()
    }

    /// Block until the next update or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UpdatePayload> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Try to receive an update without blocking
    pub fn try_recv(&self) -> Option<UpdatePayload> {
        self.rx.try_recv().ok()
    }

    /// Get a non-blocking iterator over currently available updates
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }

    /// Get a blocking iterator with timeout
    ///
    /// Each call to `next()` blocks for up to `timeout`; iteration stops the
    /// first time it expires.
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }

    /// Disconnect and wait for the reader thread.
    ///
    /// Updates not yet received are discarded.
    pub fn close(mut self) -> Result<SessionSummary> {
        self.shutdown_stream();
        match self.reader.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(ViewerError::Io(std::io::Error::other(
                "viewer reader thread panicked",
            ))),
            None => Ok(SessionSummary::default()),
        }
    }

    fn shutdown_stream(&self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => warn!("Failed to shut down viewer connection: {}", e),
        }
    }
}

impl Iterator for UpdateIterator {
    type Item = UpdatePayload;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl<'a> IntoIterator for &'a UpdateIterator {
    type Item = UpdatePayload;
    type IntoIter = mpsc::Iter<'a, UpdatePayload>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}

impl Drop for UpdateIterator {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.shutdown_stream();
        }
    }
}

/// Non-blocking iterator over currently available updates
pub struct TryIter<'a> {
    inner: &'a UpdateIterator,
}

impl Iterator for TryIter<'_> {
    type Item = UpdatePayload;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a> {
    inner: &'a UpdateIterator,
    timeout: Duration,
}

impl Iterator for TimeoutIter<'_> {
    type Item = UpdatePayload;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}
