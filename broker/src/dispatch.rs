//! Dispatch loop thread
//!
//! Spawns a thread with its own single-threaded tokio runtime that owns the
//! listening socket and every viewer connection. Each iteration waits at most
//! the poll interval for something to happen, services all sockets without
//! blocking, then fans queued events out to the matching connections.

use std::fs;
use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use futures::future::{self, FutureExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, trace, warn};

use stopcast_protocol::{encode_frame, UpdatePayload, WireMessage};

use crate::config::BrokerConfig;
use crate::connection::{Connection, ConnectionId};
use crate::queue::EventQueue;
use crate::state::SharedState;

/// Spawns the dispatch thread
///
/// `listener` must already be bound. `done_tx` receives one message once the
/// thread has released every socket and marked the run as stopped.
pub(crate) fn spawn_dispatch_loop(
    listener: StdUnixListener,
    config: BrokerConfig,
    shared: Arc<SharedState>,
    queue: Arc<EventQueue>,
    done_tx: mpsc::Sender<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stopcast-broker".to_string())
        .spawn(move || {
            let socket_path = config.socket_path.clone();

            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(async {
                    match Broker::new(listener, config, Arc::clone(&shared), Arc::clone(&queue)) {
                        Ok(broker) => broker.run().await,
                        Err(e) => {
                            error!("Failed to register broker socket with the runtime: {}", e);
                            queue.close();
                        }
                    }
                }),
                Err(e) => {
                    error!("Failed to create tokio runtime for broker: {}", e);
                    queue.close();
                }
            }

            remove_socket_file(&socket_path);
            shared.mark_stopped();
            let _ = done_tx.send(());
        })
}

fn remove_socket_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed broker socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove broker socket {}: {}", path.display(), e),
    }
}

/// Owns the listener and the live connection set.
struct Broker {
    listener: UnixListener,
    connections: Vec<Connection>,
    next_id: u64,
    config: BrokerConfig,
    shared: Arc<SharedState>,
    queue: Arc<EventQueue>,
}

impl Broker {
    fn new(
        listener: StdUnixListener,
        config: BrokerConfig,
        shared: Arc<SharedState>,
        queue: Arc<EventQueue>,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        Ok(Self {
            listener,
            connections: Vec::new(),
            next_id: 0,
            config,
            shared,
            queue,
        })
    }

    /// Main loop, returns after a stop request once every socket is closed
    async fn run(mut self) {
        info!(
            socket = %self.config.socket_path.display(),
            "Broker started"
        );

        while !self.shared.stop_requested() {
            let accepted = self.wait_for_activity().await;

            self.service_connections();

            if let Some(stream) = accepted {
                self.accept(stream);
            }

            let events = self.queue.drain_all();
            if !events.is_empty() {
                self.dispatch(events);
            }

            self.reap_closed();
        }

        self.shutdown();
    }

    /// Wait until something needs attention or the poll interval elapses.
    ///
    /// Returns a newly accepted stream, if any.
    async fn wait_for_activity(&self) -> Option<UnixStream> {
        tokio::select! {
            biased;

            _ = self.shared.stop_notified() => None,

            accepted = self.listener.accept() => match accepted {
                Ok((stream, _addr)) => Some(stream),
                Err(e) => {
                    warn!("Failed to accept viewer connection: {}", e);
                    // Back off so a persistent error (e.g. out of descriptors)
                    // does not spin the loop.
                    tokio::time::sleep(self.config.poll_interval).await;
                    None
                }
            },

            _ = any_ready(&self.connections) => None,

            _ = self.queue.notified() => None,

            _ = tokio::time::sleep(self.config.poll_interval) => None,
        }
    }

    fn service_connections(&mut self) {
        for conn in self.connections.iter_mut() {
            let outcome = conn.on_readable();
            if outcome.decode_failures > 0 {
                trace!(
                    connection = %conn.id(),
                    dropped = outcome.decode_failures,
                    "Skipped undecodable frames"
                );
            }
            for types in outcome.subscriptions {
                self.shared.set_subscription(conn.id(), types);
            }
            conn.flush();
        }
    }

    fn accept(&mut self, stream: UnixStream) {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);

        self.shared.register_connection(id);
        self.connections
            .push(Connection::new(id, stream, &self.config));

        debug!(
            connection = %id,
            live = self.connections.len(),
            "Accepted viewer connection"
        );
    }

    /// Fan each event out to the connections subscribed to its type.
    ///
    /// Events are handled strictly in queue order and every connection's
    /// outbound backlog is FIFO, so each viewer sees its updates in push order.
    fn dispatch(&mut self, events: Vec<UpdatePayload>) {
        for event in events {
            let update_type = event.update_type();
            let recipients = self.shared.subscribers_of(update_type);
            if recipients.is_empty() {
                trace!(%update_type, "No subscribers for update");
                continue;
            }

            let frame = match encode_frame(&WireMessage::Update(event)) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(%update_type, "Failed to encode update: {}", e);
                    continue;
                }
            };

            let mut delivered = 0usize;
            for conn in self
                .connections
                .iter_mut()
                .filter(|conn| conn.is_open() && recipients.contains(&conn.id()))
            {
                conn.send(&frame);
                delivered += 1;
            }

            trace!(
                %update_type,
                recipients = delivered,
                bytes = frame.len(),
                "Dispatched update"
            );
        }
    }

    fn reap_closed(&mut self) {
        let shared = &self.shared;
        self.connections.retain_mut(|conn| {
            if conn.is_open() {
                return true;
            }

            debug!(connection = %conn.id(), state = ?conn.state(), "Removed viewer connection");
            conn.close();
            shared.remove_connection(conn.id());
            false
        });
    }

    fn shutdown(mut self) {
        let open = self.connections.len();
        for conn in self.connections.iter_mut() {
            conn.close();
        }
        self.connections.clear();

        let discarded = self.queue.close();
        if discarded > 0 {
            debug!(discarded, "Dropped undelivered updates at shutdown");
        }

        info!(
            closed_connections = open,
            "Broker stopped"
        );
    }
}

/// Resolves when any connection is ready; never resolves when there are none.
async fn any_ready(connections: &[Connection]) {
    if connections.is_empty() {
        return future::pending().await;
    }

    let waits = connections.iter().map(|conn| conn.ready().boxed_local());
    let _ = future::select_all(waits).await;
}
