//! Bounded multi-producer queue with a single closing owner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tracing::{debug, trace, warn};

use crate::error::{QueueError, Result};
use crate::event::Event;

/// Create a bounded queue with the given capacity.
///
/// Returns the closing owner, the producer side and the consumer side.
/// Both sides can be cloned freely; the closer cannot.
pub fn bounded(capacity: usize) -> Result<(EventQueue, EventSink, EventReceiver)> {
    if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
        return Err(QueueError::InvalidCapacity(capacity));
    }

    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(State::default()),
        slots: Semaphore::new(capacity),
        available: Notify::new(),
        blocked_pushes: AtomicU64::new(0),
    });

    debug!(capacity, "created aggregation queue");

    Ok((
        EventQueue {
            shared: shared.clone(),
        },
        EventSink {
            shared: shared.clone(),
        },
        EventReceiver { shared },
    ))
}

struct Shared {
    capacity: usize,

    /// Buffer and counters. `closed` is only flipped while holding this lock,
    /// so a push either lands before close or fails. Never held across an
    /// await.
    state: Mutex<State>,

    /// One permit per free slot.
    slots: Semaphore,

    /// Wakes consumers when an event arrives or the queue closes.
    available: Notify,

    blocked_pushes: AtomicU64,
}

#[derive(Default)]
struct State {
    buffer: VecDeque<Event>,
    closed: bool,
    peak_depth: usize,
    pushed: u64,
    popped: u64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_locked(&self, state: &mut State) -> bool {
        if state.closed {
            return false;
        }
        state.closed = true;
        self.slots.close();
        self.available.notify_waiters();
        true
    }

    fn stats_locked(&self, state: &State) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            depth: state.buffer.len(),
            peak_depth: state.peak_depth,
            pushed: state.pushed,
            popped: state.popped,
            blocked_pushes: self.blocked_pushes.load(Ordering::Relaxed),
            closed: state.closed,
        }
    }
}

/// Owner of the queue's close operation.
///
/// There is exactly one of these per queue. Dropping it closes the queue so
/// consumers are never left waiting on a queue nobody can close.
pub struct EventQueue {
    shared: Arc<Shared>,
}

impl EventQueue {
    /// Close the queue.
    ///
    /// Pending and future pushes fail with [`QueueError::Closed`]; buffered
    /// events remain available to consumers. Returns `false` if the queue
    /// was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.shared.state();
        let buffered = state.buffer.len();

        if !self.shared.close_locked(&mut state) {
            warn!("aggregation queue already closed");
            return false;
        }

        debug!(buffered, "closed aggregation queue");
        true
    }

    /// Get a new producer handle.
    pub fn sink(&self) -> EventSink {
        EventSink {
            shared: self.shared.clone(),
        }
    }

    /// Get a new consumer handle.
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            shared: self.shared.clone(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state();
        self.shared.stats_locked(&state)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if self.shared.close_locked(&mut state) {
            debug!("aggregation queue closed on drop");
        }
    }
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
}

impl EventSink {
    /// Push an event, waiting while the queue is full.
    ///
    /// Fails with [`QueueError::Closed`] if the queue is closed before the
    /// event is buffered. Dropping the returned future before it completes
    /// leaves the queue untouched.
    pub async fn push(&self, event: Event) -> Result<()> {
        let permit = match self.shared.slots.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
            Err(TryAcquireError::NoPermits) => {
                self.shared.blocked_pushes.fetch_add(1, Ordering::Relaxed);
                trace!(source = event.source(), "queue full, waiting for a free slot");
                self.shared
                    .slots
                    .acquire()
                    .await
                    .map_err(|_| QueueError::Closed)?
            }
        };

        let mut state = self.shared.state();
        if state.closed {
            return Err(QueueError::Closed);
        }

        permit.forget();
        state.buffer.push_back(event);
        state.pushed += 1;
        state.peak_depth = state.peak_depth.max(state.buffer.len());
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    /// Push without waiting.
    pub fn try_push(&self, event: Event) -> std::result::Result<(), Rejected> {
        let permit = match self.shared.slots.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Rejected::new(event, QueueError::Closed)),
            Err(TryAcquireError::NoPermits) => {
                return Err(Rejected::new(event, QueueError::Full(self.shared.capacity)));
            }
        };

        let mut state = self.shared.state();
        if state.closed {
            return Err(Rejected::new(event, QueueError::Closed));
        }

        permit.forget();
        state.buffer.push_back(event);
        state.pushed += 1;
        state.peak_depth = state.peak_depth.max(state.buffer.len());
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }
}

/// An event that a non-blocking push could not buffer.
#[derive(Debug)]
pub struct Rejected {
    /// The event, handed back to the caller.
    pub event: Event,

    /// Why it was rejected.
    pub reason: QueueError,
}

impl Rejected {
    fn new(event: Event, reason: QueueError) -> Self {
        Self { event, reason }
    }
}

/// Consumer side of the queue.
#[derive(Clone)]
pub struct EventReceiver {
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Pop the next event.
    ///
    /// Waits while the queue is empty and open. Returns `None` once the queue
    /// is closed and every buffered event has been handed out.
    pub async fn pop(&self) -> Option<Event> {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state();
                if let Some(event) = state.buffer.pop_front() {
                    state.popped += 1;
                    let more = !state.buffer.is_empty();
                    drop(state);

                    self.shared.slots.add_permits(1);
                    if more {
                        self.shared.available.notify_one();
                    }
                    return Some(event);
                }

                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.shared.state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is closed and fully drained.
    pub fn is_finished(&self) -> bool {
        let state = self.shared.state();
        state.closed && state.buffer.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state();
        self.shared.stats_locked(&state)
    }

    /// Turn the receiver into a stream that ends when the queue is drained.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |receiver| async move {
            let event = receiver.pop().await?;
            Some((event, receiver))
        })
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Maximum number of buffered events.
    pub capacity: usize,

    /// Currently buffered events.
    pub depth: usize,

    /// Highest depth seen so far.
    pub peak_depth: usize,

    /// Events accepted.
    pub pushed: u64,

    /// Events handed to consumers.
    pub popped: u64,

    /// Pushes that had to wait for a free slot.
    pub blocked_pushes: u64,

    /// Whether the queue has been closed.
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn event(source: &str, n: i64) -> Event {
        Event::new(source, EventKind::Add, json!(n))
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(bounded(0), Err(QueueError::InvalidCapacity(0))));
    }

    #[tokio::test]
    async fn test_push_pop_preserves_order() {
        let (_queue, sink, receiver) = bounded(4).unwrap();

        for n in 0..3 {
            sink.push(event("a", n)).await.unwrap();
        }

        for n in 0..3 {
            let popped = receiver.pop().await.unwrap();
            assert_eq!(popped.payload(), &json!(n));
        }
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_buffered_events() {
        let (queue, sink, receiver) = bounded(8).unwrap();
        sink.push(event("a", 1)).await.unwrap();
        sink.push(event("b", 2)).await.unwrap();

        assert!(queue.close());

        assert!(receiver.pop().await.is_some());
        assert!(receiver.pop().await.is_some());
        assert!(receiver.pop().await.is_none());
        assert!(receiver.pop().await.is_none());
        assert!(receiver.is_finished());
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let (queue, sink, _receiver) = bounded(2).unwrap();
        queue.close();

        assert_eq!(sink.push(event("a", 1)).await, Err(QueueError::Closed));
        let rejected = sink.try_push(event("a", 2)).unwrap_err();
        assert_eq!(rejected.reason, QueueError::Closed);
        assert_eq!(queue.stats().pushed, 0);
    }

    #[tokio::test]
    async fn test_second_close_is_noop() {
        let (queue, _sink, _receiver) = bounded(2).unwrap();
        assert!(queue.close());
        assert!(!queue.close());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_pop() {
        let (queue, sink, receiver) = bounded(1).unwrap();
        sink.push(event("a", 1)).await.unwrap();

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.push(event("a", 2)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        assert_eq!(receiver.len(), 1);

        let first = receiver.pop().await.unwrap();
        assert_eq!(first.payload(), &json!(1));

        blocked.await.unwrap().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.peak_depth, 1);
        assert_eq!(stats.blocked_pushes, 1);
        assert_eq!(stats.pushed, 2);
    }

    #[tokio::test]
    async fn test_blocked_push_wakes_on_pop() {
        let (_queue, sink, receiver) = bounded(1).unwrap();
        sink.push(event("a", 1)).await.unwrap();

        let mut push = tokio_test::task::spawn(sink.push(event("a", 2)));
        tokio_test::assert_pending!(push.poll());
        assert!(!push.is_woken());

        receiver.pop().await.unwrap();
        assert!(push.is_woken());
        tokio_test::assert_ready_ok!(push.poll());
        assert_eq!(receiver.len(), 1);
    }

    #[tokio::test]
    async fn test_try_push_reports_full() {
        let (_queue, sink, _receiver) = bounded(1).unwrap();
        sink.try_push(event("a", 1)).unwrap();

        let rejected = sink.try_push(event("a", 2)).unwrap_err();
        assert_eq!(rejected.reason, QueueError::Full(1));
        assert_eq!(rejected.event.payload(), &json!(2));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_push() {
        let (queue, sink, receiver) = bounded(1).unwrap();
        sink.push(event("a", 1)).await.unwrap();

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.push(event("a", 2)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();
        assert_eq!(blocked.await.unwrap(), Err(QueueError::Closed));

        // Only the event buffered before close is delivered.
        assert!(receiver.pop().await.is_some());
        assert!(receiver.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_producer() {
        let (_queue, sink, receiver) = bounded(2).unwrap();

        let consumer = tokio::spawn(async move { receiver.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        sink.push(event("a", 7)).await.unwrap();
        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.payload(), &json!(7));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let (queue, _sink, receiver) = bounded(2).unwrap();

        let consumer = tokio::spawn(async move { receiver.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();
        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropping_owner_closes_queue() {
        let (queue, sink, receiver) = bounded(2).unwrap();
        sink.push(event("a", 1)).await.unwrap();
        drop(queue);

        assert!(sink.is_closed());
        assert!(receiver.pop().await.is_some());
        assert!(receiver.pop().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dropping_owner_under_contention_ends_consumer() {
        for _ in 0..50 {
            let (queue, sink, receiver) = bounded(1).unwrap();

            let mut producers = Vec::new();
            for source in ["a", "b", "c"] {
                let sink = sink.clone();
                producers.push(tokio::spawn(async move {
                    let mut n = 0;
                    while sink.push(event(source, n)).await.is_ok() {
                        n += 1;
                    }
                }));
            }
            drop(sink);

            let consumer = tokio::spawn(async move {
                let mut seen = 0u64;
                while receiver.pop().await.is_some() {
                    seen += 1;
                }
                seen
            });

            tokio::time::sleep(Duration::from_millis(2)).await;
            drop(queue);

            let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .expect("consumer never saw end-of-stream")
                .unwrap();
            assert!(seen > 0);
            for producer in producers {
                tokio::time::timeout(Duration::from_secs(5), producer)
                    .await
                    .expect("producer kept pushing after close")
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_drain() {
        let (queue, sink, receiver) = bounded(3).unwrap();

        let producer = tokio::spawn(async move {
            for n in 0..10 {
                sink.push(event("a", n)).await.unwrap();
            }
        });

        let collector = tokio::spawn(receiver.into_stream().collect::<Vec<_>>());

        producer.await.unwrap();
        queue.close();

        let events = collector.await.unwrap();
        assert_eq!(events.len(), 10);
        assert!(queue.stats().peak_depth <= 3);
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_exceed_capacity() {
        let (queue, sink, receiver) = bounded(2).unwrap();

        let mut producers = Vec::new();
        for source in ["a", "b", "c"] {
            let sink = sink.clone();
            producers.push(tokio::spawn(async move {
                for n in 0..20 {
                    sink.push(event(source, n)).await.unwrap();
                }
            }));
        }

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = receiver.pop().await {
                seen.push(event);
            }
            seen
        });

        for producer in producers {
            producer.await.unwrap();
        }
        queue.close();

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 60);

        // Per-source order survives the merge.
        for source in ["a", "b", "c"] {
            let values: Vec<_> = seen
                .iter()
                .filter(|e| e.source() == source)
                .map(|e| e.payload().as_i64().unwrap())
                .collect();
            assert_eq!(values, (0..20).collect::<Vec<_>>());
        }

        let stats = queue.stats();
        assert!(stats.peak_depth <= 2);
        assert_eq!(stats.pushed, 60);
        assert_eq!(stats.popped, 60);
    }
}
