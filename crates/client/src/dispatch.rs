//! Typed in-process broadcast.
//!
//! A [`Dispatcher`] fans each published event out synchronously, in
//! registration order, to every observer registered at the time of the call.
//! Nothing is buffered: late observers never see earlier events.
//!
//! Registration returns a [`Subscription`]. Releasing it (explicitly, or by
//! dropping it) removes the observer.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    observers: Vec<(u64, Observer<E>)>,
}

pub struct Dispatcher<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E: 'static> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    /// Register an observer for every subsequently published event.
    #[must_use = "dropping the subscription unregisters the observer"]
    pub fn register(&self, observer: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.observers.push((id, Arc::new(observer)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().observers.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Deliver `event` to every registered observer. Returns how many saw it.
    ///
    /// Observers run outside the registry lock, so they may register or
    /// release subscriptions; such changes take effect from the next event.
    pub fn publish(&self, event: &E) -> usize {
        let observers: Vec<Observer<E>> = self
            .registry
            .lock()
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in &observers {
            observer(event);
        }
        observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.registry.lock().observers.len()
    }
}

/// Handle for one registered observer.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregister the observer now.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
