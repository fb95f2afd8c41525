//! Event queue between the debugger's stop callback and the dispatch loop.
//!
//! Pushing never blocks on the broker: the producer takes a short mutex,
//! appends, and signals the loop. The loop drains everything in one go on its
//! own schedule.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use stopcast_protocol::UpdatePayload;

/// FIFO of updates waiting to be fanned out.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<UpdatePayload>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    dropped: AtomicU64,
    wakeup: Notify,
}

impl EventQueue {
    /// Create a queue; `capacity` of `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            wakeup: Notify::new(),
        }
    }

    /// Append an event.
    ///
    /// Returns `false` if the queue is closed and the event was discarded.
    /// On a bounded queue that is full the oldest waiting event is dropped to
    /// make room.
    pub fn push(&self, event: UpdatePayload) -> bool {
        {
            let mut events = self.events.lock();
            if self.closed.load(Ordering::Acquire) {
                return false;
            }

            if let Some(capacity) = self.capacity {
                while events.len() >= capacity {
                    events.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            events.push_back(event);
        }

        self.wakeup.notify_one();
        true
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain_all(&self) -> Vec<UpdatePayload> {
        self.events.lock().drain(..).collect()
    }

    /// Resolves after a push that happened since the previous wake-up.
    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Refuse further pushes and discard whatever is still queued.
    ///
    /// Returns the number of events discarded.
    pub fn close(&self) -> usize {
        let mut events = self.events.lock();
        self.closed.store(true, Ordering::Release);
        let discarded = events.len();
        events.clear();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events evicted by the capacity limit so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cheap, cloneable handle the producer uses to enqueue updates.
#[derive(Debug, Clone)]
pub struct Publisher {
    queue: Arc<EventQueue>,
}

impl Publisher {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue an update for fan-out.
    ///
    /// Returns `false` once the broker run this publisher belongs to has
    /// stopped; the update is dropped.
    pub fn publish(&self, payload: UpdatePayload) -> bool {
        let update_type = payload.update_type();
        let accepted = self.queue.push(payload);
        if accepted {
            tracing::trace!(%update_type, "Queued update");
        } else {
            tracing::debug!(%update_type, "Broker stopped, dropping update");
        }
        accepted
    }

    /// Whether the broker run is still accepting updates.
    pub fn is_active(&self) -> bool {
        !self.queue.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn disasm(n: usize) -> UpdatePayload {
        UpdatePayload::Disasm(format!("insn {n}"))
    }

    #[test]
    fn test_drain_preserves_push_order() {
        let queue = EventQueue::new(None);
        for n in 0..5 {
            assert!(queue.push(disasm(n)));
        }

        assert_eq!(queue.drain_all(), (0..5).map(disasm).collect::<Vec<_>>());
        assert!(queue.drain_all().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let queue = EventQueue::new(Some(2));
        for n in 0..5 {
            queue.push(disasm(n));
        }

        assert_eq!(queue.dropped(), 3);
        assert_eq!(queue.drain_all(), vec![disasm(3), disasm(4)]);
    }

    #[test]
    fn test_closed_queue_rejects_and_discards() {
        let queue = Arc::new(EventQueue::new(None));
        let publisher = Publisher::new(Arc::clone(&queue));
        publisher.publish(disasm(0));
        publisher.publish(disasm(1));

        assert_eq!(queue.close(), 2);
        assert!(!publisher.is_active());
        assert!(!publisher.publish(disasm(2)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producer_and_drainer() {
        let queue = Arc::new(EventQueue::new(None));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..1000 {
                    queue.push(disasm(n));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            seen.extend(queue.drain_all());
            thread::yield_now();
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..1000).map(disasm).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_loop() {
        let queue = EventQueue::new(None);
        queue.push(disasm(0));

        tokio::time::timeout(std::time::Duration::from_secs(1), queue.notified())
            .await
            .expect("push did not wake the loop");
    }
}
