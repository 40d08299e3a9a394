//! Synchronous event delivery with disposal-based subscriptions.
//!
//! Caches subscribe to workspace notifications at construction and release
//! them through [`Subscription::dispose`]. Delivery is synchronous: a
//! notification emitted between two awaited suspension points is visible to
//! the next cache read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct EventEmitter<T> {
    listeners: Arc<Mutex<HashMap<u64, Listener<T>>>>,
    next_id: AtomicU64,
}

impl<T: 'static> EventEmitter<T> {
    pub fn new() -> EventEmitter<T> {
        EventEmitter {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener table poisoned")
            .insert(id, listener);

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners
                    .lock()
                    .expect("listener table poisoned")
                    .remove(&id);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        // Snapshot so a listener may dispose subscriptions while running.
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .expect("listener table poisoned")
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

impl<T: 'static> Default for EventEmitter<T> {
    fn default() -> Self {
        EventEmitter::new()
    }
}

/// Handle to a registered listener. Disposing is idempotent; dropping the
/// handle disposes it.
pub struct Subscription {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Subscription {
        Subscription {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn dispose(&self) {
        let teardown = self.teardown.lock().expect("teardown lock poisoned").take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Test: every live listener observes an emitted value.
    #[test]
    fn test_emit_reaches_listeners() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen2 = seen.clone();
        let _sub = emitter.subscribe(Arc::new(move |v: &u32| {
            seen2.fetch_add(*v as usize, Ordering::SeqCst);
        }));

        emitter.emit(&3);
        emitter.emit(&4);

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    /// Test: a disposed subscription no longer receives events, and a second
    /// dispose is a no-op.
    #[test]
    fn test_dispose_is_idempotent() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen2 = seen.clone();
        let sub = emitter.subscribe(Arc::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));

        emitter.emit(&());
        sub.dispose();
        sub.dispose();
        emitter.emit(&());

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    /// Test: dropping the handle also unsubscribes.
    #[test]
    fn test_drop_unsubscribes() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen2 = seen.clone();
        let sub = emitter.subscribe(Arc::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));
        drop(sub);

        emitter.emit(&());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
