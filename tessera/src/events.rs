//! Explicit observer registration for fetch notifications.
//!
//! Handlers are owned by the [`EventEmitter`] only while the corresponding [`Subscription`] guard
//! is alive. Dropping the guard unregisters the handler, and the guard itself does not keep the
//! emitter alive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Dispatches events to the registered handlers.
pub struct EventEmitter<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: vec![],
            })),
        }
    }
}

impl<E: 'static> EventEmitter<E> {
    /// Registers a handler. The handler is called for every emitted event until the returned
    /// guard is dropped.
    #[must_use = "the handler is unregistered when the subscription is dropped"]
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.push((id, Arc::new(handler)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().handlers.retain(|(h_id, _)| *h_id != id);
                }
            })),
        }
    }

    /// Calls all registered handlers with the event.
    ///
    /// Handlers are called without holding the registry lock, so a handler may subscribe or drop
    /// subscriptions.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .registry
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn subscribers_count(&self) -> usize {
        self.registry.lock().handlers.len()
    }
}

/// Guard of a registered event handler. The handler is removed when the guard is dropped.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keeps the handler registered for the whole lifetime of the emitter.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn handler_receives_events_while_subscribed() {
        let emitter = EventEmitter::<u32>::default();
        let sum = Arc::new(AtomicUsize::new(0));

        let sum_clone = sum.clone();
        let subscription = emitter.subscribe(move |v| {
            sum_clone.fetch_add(*v as usize, Ordering::Relaxed);
        });

        emitter.emit(&1);
        emitter.emit(&2);
        assert_eq!(sum.load(Ordering::Relaxed), 3);

        drop(subscription);
        emitter.emit(&10);
        assert_eq!(sum.load(Ordering::Relaxed), 3);
        assert_eq!(emitter.subscribers_count(), 0);
    }

    #[test]
    fn detached_handler_stays_registered() {
        let emitter = EventEmitter::<u32>::default();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        emitter
            .subscribe(move |_| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            })
            .detach();

        emitter.emit(&0);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(emitter.subscribers_count(), 1);
    }

    #[test]
    fn subscription_outliving_emitter() {
        let emitter = EventEmitter::<u32>::default();
        let subscription = emitter.subscribe(|_| {});
        drop(emitter);
        drop(subscription);
    }

    #[test]
    fn several_handlers() {
        let emitter = EventEmitter::<u32>::default();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let _s1 = emitter.subscribe(move |_| {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        let c2 = count.clone();
        let s2 = emitter.subscribe(move |_| {
            c2.fetch_add(1, Ordering::Relaxed);
        });

        emitter.emit(&0);
        assert_eq!(count.load(Ordering::Relaxed), 2);

        drop(s2);
        emitter.emit(&0);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }
}
