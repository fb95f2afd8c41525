//! State shared between the dispatch thread and the controller.
//!
//! The lifecycle state and the subscription registry sit behind one mutex.
//! The dispatch loop reads the state every iteration and updates the registry
//! as viewers come and go; the controller only writes the state (to request a
//! stop) and reads the registry for status reports.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;

use stopcast_protocol::UpdateType;

use crate::connection::ConnectionId;
use crate::subscription::SubscriptionRegistry;

/// Lifecycle of one broker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerState::NotStarted => "not started",
            BrokerState::Running => "running",
            BrokerState::StopRequested => "stopping",
            BrokerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Inner {
    state: BrokerState,
    registry: SubscriptionRegistry,
}

#[derive(Debug)]
pub(crate) struct SharedState {
    inner: Mutex<Inner>,
    stop_signal: Notify,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BrokerState::NotStarted,
                registry: SubscriptionRegistry::new(),
            }),
            stop_signal: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> BrokerState {
        self.inner.lock().state
    }

    pub(crate) fn mark_running(&self) {
        self.inner.lock().state = BrokerState::Running;
    }

    /// Ask the loop to stop and wake it if it is waiting.
    ///
    /// Returns `false` when the run already finished.
    pub(crate) fn request_stop(&self) -> bool {
        let requested = {
            let mut inner = self.inner.lock();
            match inner.state {
                BrokerState::Stopped => false,
                _ => {
                    inner.state = BrokerState::StopRequested;
                    true
                }
            }
        };

        if requested {
            self.stop_signal.notify_one();
        }
        requested
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.inner.lock().state == BrokerState::StopRequested
    }

    /// Resolves once a stop has been requested since the last wake-up.
    pub(crate) async fn stop_notified(&self) {
        self.stop_signal.notified().await;
    }

    /// Final transition, made by the dispatch thread on its way out.
    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.state = BrokerState::Stopped;
        inner.registry.clear();
    }

    pub(crate) fn register_connection(&self, id: ConnectionId) {
        self.inner.lock().registry.insert(id);
    }

    pub(crate) fn remove_connection(&self, id: ConnectionId) {
        self.inner.lock().registry.remove(id);
    }

    pub(crate) fn set_subscription(&self, id: ConnectionId, types: BTreeSet<UpdateType>) -> bool {
        self.inner.lock().registry.set_subscription(id, types)
    }

    pub(crate) fn subscribers_of(&self, update_type: UpdateType) -> BTreeSet<ConnectionId> {
        self.inner.lock().registry.subscribers_of(update_type)
    }

    /// State and subscriptions read under a single lock acquisition.
    pub(crate) fn snapshot(&self) -> (BrokerState, Vec<(ConnectionId, BTreeSet<UpdateType>)>) {
        let inner = self.inner.lock();
        (inner.state, inner.registry.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let shared = SharedState::new();
        assert_eq!(shared.state(), BrokerState::NotStarted);

        shared.mark_running();
        assert!(!shared.stop_requested());

        assert!(shared.request_stop());
        assert!(shared.stop_requested());
        assert_eq!(shared.state(), BrokerState::StopRequested);

        shared.mark_stopped();
        assert_eq!(shared.state(), BrokerState::Stopped);
        assert!(!shared.request_stop());
        assert_eq!(shared.state(), BrokerState::Stopped);
    }

    #[test]
    fn test_stopping_clears_subscriptions() {
        let shared = SharedState::new();
        let id = ConnectionId::new(7);
        shared.register_connection(id);
        shared.set_subscription(id, [UpdateType::Stack].into_iter().collect());

        shared.mark_stopped();

        let (state, connections) = shared.snapshot();
        assert_eq!(state, BrokerState::Stopped);
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn test_stop_request_wakes_a_later_waiter() {
        let shared = SharedState::new();
        shared.mark_running();
        shared.request_stop();

        // The permit is stored, so a waiter arriving after the request
        // still wakes immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), shared.stop_notified())
            .await
            .expect("stop notification was lost");
    }
}
