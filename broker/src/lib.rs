//! # Stopcast Broker
//!
//! Debugger-side half of stopcast: fans debugger state captured at each stop
//! out to the viewer processes that asked for it.
//!
//! ## Overview
//!
//! Viewers connect to a local socket and subscribe to a subset of
//! [`UpdateType`]s. Each time the debuggee stops, the debugger's stop callback
//! enqueues one update per type; a dispatch loop running on its own thread
//! drains the queue and sends every update to the viewers subscribed to its
//! type, and only to them.
//!
//! ## Key Features
//!
//! - **Sync API**: [`BrokerController`] drives the broker without any async
//!   on the caller's side
//! - **Never blocks the debugger**: publishing is a short queue push
//! - **Isolated viewers**: a viewer that stops reading or sends garbage only
//!   ever affects its own connection
//! - **Bounded shutdown**: `stop` waits at most `stop_timeout` and reports a
//!   timeout instead of hanging
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stopcast_broker::prelude::*;
//!
//! let controller = BrokerController::new(BrokerConfig::from_env());
//! controller.start()?;
//!
//! // Wire the debugger's stop callback to a StopPublisher.
//! let on_stop = controller
//!     .stop_publisher(ProducerLimits::default())
//!     .expect("broker is running");
//! # struct Gdb;
//! # impl StopStateSource for Gdb {
//! #     fn registers(&mut self) -> std::result::Result<stopcast_protocol::RegisterSnapshot, SourceError> { unimplemented!() }
//! #     fn disassemble(&mut self, _: usize) -> std::result::Result<String, SourceError> { unimplemented!() }
//! #     fn read_stack(&mut self, _: u64, _: usize) -> std::result::Result<Vec<u8>, SourceError> { unimplemented!() }
//! #     fn backtrace(&mut self) -> std::result::Result<String, SourceError> { unimplemented!() }
//! # }
//! # let mut gdb = Gdb;
//! on_stop.on_stop(&mut gdb).ok();
//!
//! println!("{}", controller.status());
//! controller.stop()?;
//! # Ok::<(), BrokerError>(())
//! ```
//!
//! ## Architecture
//!
//! 1. **Controller**: binds the socket on the caller's thread, then hands it
//!    to the dispatch thread
//! 2. **Event queue**: FIFO between the stop callback and the dispatch loop
//! 3. **Dispatch loop**: single-threaded tokio runtime on a dedicated thread;
//!    waits at most `poll_interval` per iteration, services sockets without
//!    blocking, then fans out queued updates
//! 4. **Subscriptions**: one per connection, replaced wholesale by each
//!    subscribe message

mod connection;
mod dispatch;
mod socket;
mod state;

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod producer;
pub mod queue;
pub mod subscription;

// Re-export main types for convenience
pub use config::{BrokerConfig, DEFAULT_SOCKET_PATH, SOCKET_ENV};
pub use connection::{ConnectionId, ConnectionState};
pub use controller::{BrokerController, BrokerStatus, ConnectionStatus};
pub use error::{BrokerError, ConnectionError, Result, SourceError};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use producer::{ProducerLimits, StopPublisher, StopStateSource};
pub use queue::{EventQueue, Publisher};
pub use state::BrokerState;
pub use subscription::{Subscription, SubscriptionRegistry};

// Re-export the wire types callers build updates from
pub use stopcast_protocol::{
    RegisterSnapshot, RegisterValue, StackSnapshot, UpdatePayload, UpdateType,
};

/// Prelude module for convenient imports
///
/// ```rust
/// use stopcast_broker::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BrokerConfig, BrokerController, BrokerError, BrokerState, BrokerStatus, ProducerLimits,
        Publisher, SourceError, StopPublisher, StopStateSource, UpdatePayload, UpdateType,
    };
}
