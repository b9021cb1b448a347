//! # Event System
//!
//! ```text
//! ┌──────────────┐   (event, due)   ┌──────────────┐
//! │ Source A     │─── channel ─────>│ forwarder    │──┐
//! └──────────────┘                  └──────────────┘  │
//! ┌──────────────┐   (event, due)   ┌──────────────┐  │   ┌────────────┐
//! │ Source B     │─── channel ─────>│ forwarder    │──┼──>│ EventQueue │
//! └──────────────┘                  └──────────────┘  │   └─────┬──────┘
//! ┌──────────────┐          try_add                   │         │ take_due(clock)
//! │ Routine      │────────────────────────────────────┘         ▼
//! └──────────────┘                                       ┌────────────┐
//!                                                        │ SinkTable  │ (scheduler thread)
//!                                                        └────────────┘
//! ```
//!
//! Every producer ends up in one [`EventQueue`] ordered by
//! `(due time, insertion sequence)`. The sequence is assigned under the
//! queue lock, so equal due times pop in enqueue order no matter which
//! thread enqueued them.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

/// An event the scheduler can route.
///
/// Implement on a closed enum; `Kind` is its fieldless discriminator.
///
/// # Example
///
/// ```rust
/// use lockstep::SimEvent;
///
/// #[derive(Clone, Debug)]
/// enum GameEvent {
///     Shutdown,
///     KeyPressed(char),
/// }
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum GameEventKind {
///     Shutdown,
///     KeyPressed,
/// }
///
/// impl SimEvent for GameEvent {
///     type Kind = GameEventKind;
///     const SHUTDOWN: GameEventKind = GameEventKind::Shutdown;
///
///     fn kind(&self) -> GameEventKind {
///         match self {
///             GameEvent::Shutdown => GameEventKind::Shutdown,
///             GameEvent::KeyPressed(_) => GameEventKind::KeyPressed,
///         }
///     }
/// }
/// ```
pub trait SimEvent: Send + 'static {
    /// Discriminator sinks register against.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + 'static;

    /// The kind that stops the core.
    const SHUTDOWN: Self::Kind;

    /// Returns this event's discriminator.
    fn kind(&self) -> Self::Kind;
}

// =============================================================================
// EventQueue
// =============================================================================

struct Scheduled<E> {
    due: u64,
    sequence: u64,
    event: E,
}

impl<E> Scheduled<E> {
    #[inline]
    fn key(&self) -> (u64, u64) {
        (self.due, self.sequence)
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

struct QueueInner<E> {
    heap: BinaryHeap<Reverse<Scheduled<E>>>,
    next_sequence: u64,
}

/// Thread-safe min-priority queue for many producers and one consumer.
///
/// Pop order is `(priority ascending, insertion sequence ascending)`. One
/// coarse mutex guards the heap: writers are many but light, and there is a
/// single reader.
///
/// ## Usage
///
/// ```rust
/// use lockstep::EventQueue;
///
/// let queue = EventQueue::new();
/// queue.try_add("bar", 1);
/// queue.try_add("baz", 2);
/// queue.try_add("foo", 0);
///
/// assert_eq!(queue.try_take(), Some(("foo", 0)));
/// assert_eq!(queue.try_take(), Some(("bar", 1)));
/// assert_eq!(queue.try_take(), Some(("baz", 2)));
/// ```
pub struct EventQueue<E> {
    inner: Mutex<QueueInner<E>>,
}

impl<E> EventQueue<E> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Inserts `event` with `priority` (the absolute due time).
    ///
    /// The queue is unbounded, so this always succeeds and returns `true`.
    pub fn try_add(&self, event: E, priority: u64) -> bool {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(Reverse(Scheduled {
            due: priority,
            sequence,
            event,
        }));
        true
    }

    /// Removes and returns the minimum.
    pub fn try_take(&self) -> Option<(E, u64)> {
        self.inner
            .lock()
            .heap
            .pop()
            .map(|Reverse(scheduled)| (scheduled.event, scheduled.due))
    }

    /// Removes and returns the minimum if its priority is `<= now`.
    ///
    /// Peek and take happen under one lock acquisition.
    pub fn take_due(&self, now: u64) -> Option<(E, u64)> {
        let mut inner = self.inner.lock();
        match inner.heap.peek() {
            Some(Reverse(next)) if next.due <= now => inner
                .heap
                .pop()
                .map(|Reverse(scheduled)| (scheduled.event, scheduled.due)),
            _ => None,
        }
    }

    /// Priority of the minimum, without removing it.
    #[must_use]
    pub fn peek_priority(&self) -> Option<u64> {
        self.inner.lock().heap.peek().map(|Reverse(next)| next.due)
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}

impl<E: Clone> EventQueue<E> {
    /// Returns a copy of the minimum without removing it.
    #[must_use]
    pub fn try_peek(&self) -> Option<(E, u64)> {
        self.inner
            .lock()
            .heap
            .peek()
            .map(|Reverse(next)| (next.event.clone(), next.due))
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventQueue")
            .field("len", &inner.heap.len())
            .field("next_due", &inner.heap.peek().map(|Reverse(next)| next.due))
            .finish()
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// A consumer of one event kind, invoked on the scheduler thread.
pub trait EventSink<E>: Send {
    /// Handles one dispatched event.
    fn process_event(&mut self, event: &E);
}

impl<E, F> EventSink<E> for F
where
    F: FnMut(&E) + Send,
{
    fn process_event(&mut self, event: &E) {
        self(event);
    }
}

/// Handle returned by sink registration, used to deregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Sinks grouped by the kind they consume, in registration order.
pub(crate) struct SinkTable<E: SimEvent> {
    next_id: u64,
    by_kind: HashMap<E::Kind, Vec<(SinkId, Box<dyn EventSink<E>>)>>,
}

impl<E: SimEvent> SinkTable<E> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            by_kind: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, sink: Box<dyn EventSink<E>>, kind: E::Kind) -> SinkId {
        let id = SinkId(self.next_id);
        self.next_id += 1;
        self.by_kind.entry(kind).or_default().push((id, sink));
        id
    }

    pub(crate) fn remove(&mut self, id: SinkId, kind: E::Kind) -> bool {
        let Some(sinks) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        before != sinks.len()
    }

    /// Invokes every sink registered for the event's kind.
    pub(crate) fn dispatch(&mut self, event: &E) -> usize {
        match self.by_kind.get_mut(&event.kind()) {
            Some(sinks) => {
                for (_, sink) in sinks.iter_mut() {
                    sink.process_event(event);
                }
                sinks.len()
            }
            None => 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Spawns a named thread forwarding every `(event, due)` pair from `source`
/// into `queue` until all senders hang up.
pub(crate) fn spawn_forwarder<E: SimEvent>(
    name: String,
    source: Receiver<(E, u64)>,
    queue: Arc<EventQueue<E>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(name).spawn(move || {
        let mut forwarded = 0_u64;
        for (event, due) in source {
            queue.try_add(event, due);
            forwarded += 1;
        }
        tracing::debug!(forwarded, "event source closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[derive(Clone, Debug, PartialEq)]
    enum TestEvent {
        Stop,
        Ping(u32),
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum TestKind {
        Stop,
        Ping,
    }

    impl SimEvent for TestEvent {
        type Kind = TestKind;
        const SHUTDOWN: TestKind = TestKind::Stop;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Stop => TestKind::Stop,
                TestEvent::Ping(_) => TestKind::Ping,
            }
        }
    }

    #[test]
    fn test_priority_order() {
        let queue = EventQueue::new();
        assert!(queue.try_add("bar", 1));
        assert!(queue.try_add("baz", 2));
        assert!(queue.try_add("foo", 0));

        let order: Vec<_> = std::iter::from_fn(|| queue.try_take()).map(|(e, _)| e).collect();
        assert_eq!(order, vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn test_fifo_for_equal_priority() {
        let queue = EventQueue::new();
        for n in 0..100 {
            queue.try_add(n, 7);
        }
        queue.try_add(-1, 3);

        assert_eq!(queue.try_take(), Some((-1, 3)));
        let rest: Vec<_> = std::iter::from_fn(|| queue.try_take()).map(|(e, _)| e).collect();
        assert_eq!(rest, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let queue = EventQueue::new();
        assert_eq!(queue.try_peek(), None::<(u8, u64)>);

        queue.try_add(5_u8, 10);
        assert_eq!(queue.try_peek(), Some((5, 10)));
        assert_eq!(queue.peek_priority(), Some(10));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_due_respects_clock() {
        let queue = EventQueue::new();
        queue.try_add('a', 5);
        queue.try_add('b', 10);

        assert_eq!(queue.take_due(4), None);
        assert_eq!(queue.take_due(9), Some(('a', 5)));
        assert_eq!(queue.take_due(9), None);
        assert_eq!(queue.take_due(10), Some(('b', 10)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_keep_per_thread_fifo() {
        let queue = Arc::new(EventQueue::new());
        std::thread::scope(|scope| {
            for producer in 0..4_u32 {
                let queue = Arc::clone(&queue);
                scope.spawn(move || {
                    for n in 0..250_u32 {
                        queue.try_add((producer, n), 0);
                    }
                });
            }
        });

        let mut last_seen = [None::<u32>; 4];
        while let Some(((producer, n), _)) = queue.try_take() {
            let slot = &mut last_seen[producer as usize];
            assert!(slot.map_or(true, |prev| prev < n));
            *slot = Some(n);
        }
        assert_eq!(last_seen, [Some(249); 4]);
    }

    #[test]
    fn test_sink_table_routes_by_kind() {
        let pings = Arc::new(Mutex::new(Vec::new()));
        let mut table = SinkTable::<TestEvent>::new();

        let seen = Arc::clone(&pings);
        let ping_sink = table.add(
            Box::new(move |event: &TestEvent| seen.lock().push(event.clone())),
            TestKind::Ping,
        );
        table.add(Box::new(|_: &TestEvent| {}), TestKind::Stop);
        assert_eq!(table.len(), 2);

        assert_eq!(table.dispatch(&TestEvent::Ping(1)), 1);
        assert_eq!(table.dispatch(&TestEvent::Stop), 1);
        assert_eq!(*pings.lock(), vec![TestEvent::Ping(1)]);

        assert!(!table.remove(ping_sink, TestKind::Stop));
        assert!(table.remove(ping_sink, TestKind::Ping));
        assert_eq!(table.dispatch(&TestEvent::Ping(2)), 0);
        assert_eq!(pings.lock().len(), 1);
    }

    #[test]
    fn test_forwarder_drains_channel() {
        let queue = Arc::new(EventQueue::new());
        let (tx, rx) = unbounded();
        let handle = spawn_forwarder("test-source".into(), rx, Arc::clone(&queue)).unwrap();

        tx.send((TestEvent::Ping(2), 20)).unwrap();
        tx.send((TestEvent::Ping(1), 10)).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(queue.try_take(), Some((TestEvent::Ping(1), 10)));
        assert_eq!(queue.try_take(), Some((TestEvent::Ping(2), 20)));
    }
}
