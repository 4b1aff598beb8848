//! The FIFO delivery queue behind every [`Event`](super::Event).
//!
//! All asynchronous notifications in the engine (task transitions, RPC
//! replies) are enqueued here and delivered on the queue's own processing
//! thread. Delivery order equals enqueue order; exactly one record is
//! delivered per processing step. Because every listener runs on this one
//! thread, listener code never needs its own locking to stay consistent
//! with other listener code.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;

/// One queued delivery: the firing event's name (for diagnostics) and a
/// closure that resolves the listener set and invokes it.
pub(crate) struct Record {
    pub(crate) name: String,
    pub(crate) deliver: Box<dyn FnOnce() + Send>,
}

struct QueueState {
    records: VecDeque<Record>,
    stopped: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// A thread-safe, single-consumer FIFO of event deliveries.
///
/// Cheap to clone; all clones share the same queue. One thread is expected
/// to drain the queue via [`run_loop`](EventQueue::run_loop) (or
/// [`spawn_loop`](EventQueue::spawn_loop)) while arbitrary threads fire
/// events into it.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    records: VecDeque::new(),
                    stopped: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn enqueue(&self, record: Record) {
        let mut state = self.lock_state();
        state.records.push_back(record);
        drop(state);
        self.inner.cond.notify_all();
    }

    /// Pop and deliver at most one record.
    ///
    /// If `block` is set and the queue is empty and not stopped, the calling
    /// thread waits until a record arrives or the queue is stopped. Returns
    /// whether a record was delivered.
    pub fn process_one(&self, block: bool) -> bool {
        let record = {
            let mut state = self.lock_state();
            loop {
                if let Some(record) = state.records.pop_front() {
                    break Some(record);
                }
                if !block || state.stopped {
                    break None;
                }
                state = self
                    .inner
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        match record {
            Some(record) => {
                tracing::trace!(event = %record.name, "delivering");
                (record.deliver)();
                true
            }
            None => false,
        }
    }

    /// Repeatedly deliver records until the stop flag is set.
    pub fn run_loop(&self) {
        while !self.is_stopped() {
            self.process_one(true);
        }
    }

    /// Spawn a thread running [`run_loop`](EventQueue::run_loop).
    pub fn spawn_loop(&self) -> thread::JoinHandle<()> {
        let queue = self.clone();
        thread::Builder::new()
            .name("printwire-events".into())
            .spawn(move || queue.run_loop())
            .expect("failed to spawn event queue thread")
    }

    /// Request the queue to stop.
    ///
    /// Stop is itself delivered through the queue: a dedicated internal
    /// record sets the stop flag when it reaches the front, so every record
    /// enqueued before this call is delivered in order first. Records
    /// enqueued concurrently with or after `stop()` race with shutdown and
    /// may or may not be delivered; that race is part of the contract.
    pub fn stop(&self) {
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        self.enqueue(Record {
            name: "eventqueue.stop".into(),
            deliver: Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .stopped = true;
                    inner.cond.notify_all();
                }
            }),
        });
    }

    /// Whether the stop record has been delivered.
    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // Listener panics are caught during delivery, but a panic elsewhere
        // must not wedge the queue.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke one listener, isolating the queue from its panics.
pub(crate) fn deliver_isolated(event_name: &str, invoke: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(invoke)).is_err() {
        tracing::error!(event = event_name, "listener panicked during delivery");
    }
}
