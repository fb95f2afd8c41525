//! Sync lifecycle controller for the broker
//!
//! Owns at most one broker run at a time. Starting binds the socket on the
//! calling thread (so bind failures come straight back to the caller) and
//! hands the listener to a dedicated dispatch thread. Stopping is cooperative:
//! the loop is asked to stop and the caller waits a bounded time for it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use stopcast_protocol::{UpdatePayload, UpdateType};

use crate::config::BrokerConfig;
use crate::connection::ConnectionId;
use crate::dispatch::spawn_dispatch_loop;
use crate::error::{BrokerError, Result};
use crate::producer::{ProducerLimits, StopPublisher};
use crate::queue::{EventQueue, Publisher};
use crate::socket::bind_listener;
use crate::state::{BrokerState, SharedState};

/// Runs the broker and reports on it.
///
/// All methods are blocking and safe to call from any thread; the dispatch
/// loop itself never runs on the caller's thread.
///
/// # Example
///
/// ```rust,no_run
/// use stopcast_broker::{BrokerConfig, BrokerController};
/// use stopcast_protocol::UpdatePayload;
///
/// let controller = BrokerController::new(BrokerConfig::from_env());
/// controller.start()?;
///
/// // From the debugger's stop callback:
/// controller.publish(UpdatePayload::Backtrace("#0 main () at main.c:3\n".into()));
///
/// println!("{}", controller.status());
/// controller.stop()?;
/// # Ok::<(), stopcast_broker::BrokerError>(())
/// ```
pub struct BrokerController {
    config: BrokerConfig,
    inner: Mutex<ControllerInner>,
}

struct ControllerInner {
    run: Option<RunningBroker>,
    /// State reported once no run is held
    last_state: BrokerState,
}

/// Handles to one started dispatch thread.
///
/// Stays in the controller until its thread has exited, so a run that is
/// still shutting down keeps reporting `StopRequested` and blocks `start`.
struct RunningBroker {
    shared: Arc<SharedState>,
    queue: Arc<EventQueue>,
    thread: JoinHandle<()>,
    /// Held by whichever `stop` call is waiting on the thread
    done_rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl BrokerController {
    /// Create a controller; nothing is bound until [`start`](Self::start).
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(ControllerInner {
                run: None,
                last_state: BrokerState::NotStarted,
            }),
        }
    }

    /// Controller configured from the environment, see [`BrokerConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(BrokerConfig::from_env())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Bind the socket and spawn the dispatch thread.
    ///
    /// Fails with [`BrokerError::AlreadyRunning`] when a run is active, and
    /// with [`BrokerError::Bind`] when the socket path belongs to a live
    /// broker or cannot be claimed.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(run) = inner.run.take_if(|run| run.shared.state() == BrokerState::Stopped) {
            // A run that timed out in `stop` and has since finished on its own.
            join_run(run);
            inner.last_state = BrokerState::Stopped;
        }
        if inner.run.is_some() {
            debug!("Ignoring start request, broker already running");
            return Err(BrokerError::AlreadyRunning);
        }

        self.config.validate()?;
        let listener = bind_listener(&self.config.socket_path)?;

        let shared = Arc::new(SharedState::new());
        let queue = Arc::new(EventQueue::new(self.config.queue_capacity));
        let (done_tx, done_rx) = mpsc::channel();

        shared.mark_running();
        let thread = match spawn_dispatch_loop(
            listener,
            self.config.clone(),
            Arc::clone(&shared),
            Arc::clone(&queue),
            done_tx,
        ) {
            Ok(thread) => thread,
            Err(e) => {
                // The listener was moved into the failed closure and is
                // already closed; only the path is left behind.
                let _ = std::fs::remove_file(&self.config.socket_path);
                inner.last_state = BrokerState::Stopped;
                return Err(BrokerError::Spawn(e));
            }
        };

        info!(
            socket = %self.config.socket_path.display(),
            "Started broker"
        );

        inner.run = Some(RunningBroker {
            shared,
            queue,
            thread,
            done_rx: Arc::new(Mutex::new(done_rx)),
        });
        Ok(())
    }

    /// Stop the broker, waiting up to the configured `stop_timeout`.
    pub fn stop(&self) -> Result<()> {
        self.stop_with_timeout(self.config.stop_timeout)
    }

    /// Stop the broker, waiting up to `timeout` for the dispatch thread.
    ///
    /// On [`BrokerError::ShutdownTimeout`] the run is kept with its stop request
    /// pending: `state()` reports `StopRequested`, `start()` fails with
    /// `AlreadyRunning`, and a later call waits for the thread again.
    pub fn stop_with_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        // Wait without holding the lock so status() stays responsive.
        let (shared, done_rx) = {
            let inner = self.inner.lock();
            let run = inner.run.as_ref().ok_or(BrokerError::NotRunning)?;
            (Arc::clone(&run.shared), Arc::clone(&run.done_rx))
        };
        shared.request_stop();

        let finished = match done_rx.try_lock_for(timeout) {
            Some(done) => !matches!(
                done.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                Err(mpsc::RecvTimeoutError::Timeout)
            ),
            None => false,
        };
        if !finished {
            warn!(?timeout, "Failed to stop broker");
            return Err(BrokerError::ShutdownTimeout(timeout));
        }

        let run = {
            let mut inner = self.inner.lock();
            let run = inner
                .run
                .take_if(|run| Arc::ptr_eq(&run.shared, &shared));
            inner.last_state = BrokerState::Stopped;
            run
        };
        // None when a concurrent stop already reaped this run.
        if let Some(run) = run {
            join_run(run);
            info!("Stopped broker");
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BrokerState {
        let inner = self.inner.lock();
        match &inner.run {
            Some(run) => run.shared.state(),
            None => inner.last_state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == BrokerState::Running
    }

    /// Connected viewers and their subscriptions.
    pub fn status(&self) -> BrokerStatus {
        let inner = self.inner.lock();
        let Some(run) = &inner.run else {
            return BrokerStatus::NotRunning;
        };

        match run.shared.snapshot() {
            (BrokerState::Running, connections) => BrokerStatus::Running {
                connections: connections
                    .into_iter()
                    .map(|(id, subscription)| ConnectionStatus { id, subscription })
                    .collect(),
            },
            _ => BrokerStatus::NotRunning,
        }
    }

    /// Handle for enqueueing updates into the current run.
    pub fn publisher(&self) -> Option<Publisher> {
        self.inner
            .lock()
            .run
            .as_ref()
            .map(|run| Publisher::new(Arc::clone(&run.queue)))
    }

    /// Enqueue one update; returns `false` if no broker is running.
    pub fn publish(&self, payload: UpdatePayload) -> bool {
        match self.publisher() {
            Some(publisher) => publisher.publish(payload),
            None => {
                debug!(update_type = %payload.update_type(), "No broker running, dropping update");
                false
            }
        }
    }

    /// Stop-event handler bound to the current run.
    pub fn stop_publisher(&self, limits: ProducerLimits) -> Option<StopPublisher> {
        self.publisher()
            .map(|publisher| StopPublisher::new(publisher, limits))
    }
}

fn join_run(run: RunningBroker) {
    if run.thread.join().is_err() {
        warn!("Broker thread panicked during shutdown");
    }
}

impl Default for BrokerController {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl fmt::Debug for BrokerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerController")
            .field("socket_path", &self.config.socket_path)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for BrokerController {
    fn drop(&mut self) {
        if let Some(run) = self.inner.get_mut().run.take() {
            debug!("BrokerController dropping, requesting broker stop");
            run.shared.request_stop();
        }
    }
}

/// One connected viewer as reported by [`BrokerController::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    pub subscription: BTreeSet<UpdateType>,
}

/// Point-in-time view of the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerStatus {
    NotRunning,
    Running { connections: Vec<ConnectionStatus> },
}

impl BrokerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BrokerStatus::Running { .. })
    }

    /// Number of attached viewers (zero when not running).
    pub fn connection_count(&self) -> usize {
        match self {
            BrokerStatus::NotRunning => 0,
            BrokerStatus::Running { connections } => connections.len(),
        }
    }

    pub fn connections(&self) -> &[ConnectionStatus] {
        match self {
            BrokerStatus::NotRunning => &[],
            BrokerStatus::Running { connections } => connections,
        }
    }
}

impl fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerStatus::NotRunning => write!(f, "Not running"),
            BrokerStatus::Running { connections } => {
                write!(f, "There are {} clients attached", connections.len())?;
                for conn in connections {
                    let types: Vec<&str> = conn.subscription.iter().map(UpdateType::as_str).collect();
                    write!(f, "\n{} registered for: [{}]", conn.id, types.join(", "))?;
                }
                Ok(())
            }
        }
    }
}
