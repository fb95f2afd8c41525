//! Viewer side of stopcast.
//!
//! A viewer is a separate terminal process that renders one slice of the
//! debugger's state. It connects to the broker's socket, subscribes once to
//! the update types it renders and then receives an update every time the
//! debuggee stops.
//!
//! ```rust,no_run
//! use stopcast_protocol::{UpdatePayload, UpdateType};
//! use stopcast_viewer::{Subscriber, ViewerConfig};
//!
//! let config = ViewerConfig::from_env().wait_for_broker();
//! let summary = Subscriber::connect(&config, [UpdateType::Disasm])?.run(|_, update| {
//!     if let UpdatePayload::Disasm(text) = update {
//!         print!("\x1b[2J\x1b[H{text}");
//!     }
//! })?;
//! eprintln!("{} updates rendered", summary.updates_rendered);
//! # Ok::<(), stopcast_viewer::ViewerError>(())
//! ```

pub mod config;
pub mod error;
pub mod iter;
pub mod subscriber;

pub use config::{ViewerConfig, DEFAULT_SOCKET_PATH, SOCKET_ENV};
pub use error::{Result, ViewerError};
pub use iter::{TimeoutIter, TryIter, UpdateIterator};
pub use subscriber::{SessionSummary, Subscriber};
