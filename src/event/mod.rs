//! Named multi-listener notification channels with queued delivery.
//!
//! An [`Event`] is a named channel that any number of listeners can attach
//! to. Firing an event never invokes listeners synchronously: it enqueues a
//! delivery record onto the owning [`EventQueue`] and returns immediately.
//! Listeners run later, on the queue's processing thread, in FIFO order
//! relative to every other event sharing the queue.
//!
//! # Example
//!
//! ```ignore
//! let queue = EventQueue::new();
//! let event: Event<String> = Event::new("job.progress", &queue);
//! let handle = event.attach(|msg| println!("{msg}"));
//! event.fire("layer 3 of 100".to_string());
//! queue.process_one(false); // prints
//! event.detach(handle);
//! ```

mod queue;

pub use queue::EventQueue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use queue::{deliver_isolated, Record};

/// Opaque handle identifying one attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_handle: u64,
    map: HashMap<u64, Listener<T>>,
}

struct EventInner<T> {
    name: String,
    listeners: Mutex<Listeners<T>>,
    queue: EventQueue,
}

impl<T> EventInner<T> {
    /// Invoke every listener attached at delivery time, isolating panics.
    fn deliver(&self, payload: &T) {
        let snapshot: Vec<Listener<T>> = {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.map.values().cloned().collect()
        };
        for listener in snapshot {
            deliver_isolated(&self.name, || listener(payload));
        }
    }
}

/// A named, multi-listener notification channel whose invocation is always
/// queued, never synchronous.
///
/// Cheap to clone; all clones share the same listener set and owning queue.
pub struct Event<T> {
    inner: Arc<EventInner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Event<T> {
    /// Create an event owned by `queue`. The name is used in diagnostics
    /// only.
    pub fn new(name: impl Into<String>, queue: &EventQueue) -> Self {
        Self {
            inner: Arc::new(EventInner {
                name: name.into(),
                listeners: Mutex::new(Listeners {
                    next_handle: 0,
                    map: HashMap::new(),
                }),
                queue: queue.clone(),
            }),
        }
    }

    /// The event's diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach a listener. There is no uniqueness constraint: the same
    /// callable may be attached more than once and will run once per
    /// attachment.
    pub fn attach(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let handle = listeners.next_handle;
        listeners.next_handle += 1;
        listeners.map.insert(handle, Arc::new(listener));
        ListenerHandle(handle)
    }

    /// Detach a previously attached listener. Detaching an unknown handle
    /// is a no-op.
    pub fn detach(&self, handle: ListenerHandle) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.map.remove(&handle.0);
    }

    /// Fire the event with `payload`.
    ///
    /// Always asynchronous: a delivery record is enqueued on the owning
    /// queue and this call returns immediately. The listener set is resolved
    /// when the record is delivered, so a listener detached in the meantime
    /// is not invoked.
    pub fn fire(&self, payload: T) {
        let inner = Arc::clone(&self.inner);
        self.inner.queue.enqueue(Record {
            name: self.inner.name.clone(),
            deliver: Box::new(move || inner.deliver(&payload)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drain every queued record on the calling thread.
    fn drain(queue: &EventQueue) {
        while queue.process_one(false) {}
    }

    #[test]
    fn test_attach_fire_detach() {
        let queue = EventQueue::new();
        let event: Event<i32> = Event::new("test.event", &queue);

        let seen1 = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::new(Mutex::new(Vec::new()));
        let _h1 = {
            let seen = seen1.clone();
            event.attach(move |v| seen.lock().unwrap().push(*v))
        };
        let h2 = {
            let seen = seen2.clone();
            event.attach(move |v| seen.lock().unwrap().push(*v))
        };

        event.fire(1);
        drain(&queue);
        assert_eq!(*seen1.lock().unwrap(), vec![1]);
        assert_eq!(*seen2.lock().unwrap(), vec![1]);

        event.detach(h2);
        event.fire(2);
        drain(&queue);
        assert_eq!(*seen1.lock().unwrap(), vec![1, 2]);
        assert_eq!(*seen2.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_fire_is_asynchronous() {
        let queue = EventQueue::new();
        let event: Event<()> = Event::new("test.async", &queue);
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = seen.clone();
            event.attach(move |_| *seen.lock().unwrap() += 1);
        }
        event.fire(());
        // Not delivered until the queue processes the record.
        assert_eq!(*seen.lock().unwrap(), 0);
        drain(&queue);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_detach_between_fire_and_delivery() {
        let queue = EventQueue::new();
        let event: Event<()> = Event::new("test.detach", &queue);
        let seen = Arc::new(Mutex::new(0));
        let handle = {
            let seen = seen.clone();
            event.attach(move |_| *seen.lock().unwrap() += 1)
        };
        event.fire(());
        event.detach(handle);
        drain(&queue);
        // Listener sets are resolved at delivery time.
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn test_listener_panic_is_isolated() {
        let queue = EventQueue::new();
        let event: Event<()> = Event::new("test.panic", &queue);
        let seen = Arc::new(Mutex::new(0));
        event.attach(|_| panic!("boom"));
        {
            let seen = seen.clone();
            event.attach(move |_| *seen.lock().unwrap() += 1);
        }
        event.fire(());
        drain(&queue);
        // The panicking listener did not prevent the other one.
        assert_eq!(*seen.lock().unwrap(), 1);
        // The queue itself survived.
        event.fire(());
        drain(&queue);
        assert_eq!(*seen.lock().unwrap(), 2);
    }
}
