//! Claiming the broker's socket path.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use tracing::debug;

use crate::error::{BrokerError, Result};

/// Bind the listening socket at `path`.
///
/// A socket file left behind by a broker that no longer runs is removed
/// first. A path that still accepts connections belongs to a live broker and
/// is never taken over; neither is a path that is not a socket at all.
pub(crate) fn bind_listener(path: &Path) -> Result<UnixListener> {
    let bind_error = |source: io::Error| BrokerError::Bind {
        path: path.to_path_buf(),
        source,
    };

    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(bind_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a socket",
            )));
        }
        Ok(_) => {
            if UnixStream::connect(path).is_ok() {
                return Err(bind_error(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another broker is accepting connections on this socket",
                )));
            }

            debug!("Removing stale broker socket {}", path.display());
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(bind_error(e)),
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_error(e)),
    }

    UnixListener::bind(path).map_err(bind_error)
}
