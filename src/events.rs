//! Listener registry
//!
//! Subscribers register a handler and get back a [`Subscription`] token used
//! to unregister. Handlers run synchronously on the emitting thread and must
//! not block; there is no ordering guarantee between subscribers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token returned by [`Listeners::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub struct Listeners<E> {
    handlers: RwLock<Vec<(Subscription, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((token, Arc::new(handler)));
        token
    }

    /// Returns `false` if the token was unknown
    pub fn unregister(&self, token: Subscription) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so a handler may (un)register without deadlocking
        let handlers: Vec<Handler<E>> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_register_emit_unregister() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let token = listeners.register(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(listeners.unregister(token));
        assert!(!listeners.unregister(token));

        listeners.emit(&5);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_handler_can_unregister_itself() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let inner = listeners.clone();
        let slot = Arc::new(parking_lot::Mutex::new(None::<Subscription>));
        let slot_in = slot.clone();

        let token = listeners.register(move |_| {
            if let Some(t) = *slot_in.lock() {
                inner.unregister(t);
            }
        });
        *slot.lock() = Some(token);

        listeners.emit(&());
        assert!(listeners.is_empty());
    }
}
