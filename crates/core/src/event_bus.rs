//! Generic publish/subscribe bus, parameterized over the event type so the
//! same implementation backs both a session's local bus
//! (`EventBus<SessionEventKind>`) and the process-wide global bus
//! (`EventBus<GlobalEvent>`).
//!
//! Dispatch is synchronous and ordered: `emit` calls every registered
//! handler in registration order on the caller's task. A handler that
//! panics is caught and logged so later handlers still run (spec: "handler
//! exceptions are logged and do not prevent delivery to later handlers").
//! Handlers that need to do real work are expected to fan out to their own
//! task rather than block the emitter.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub type ObserverToken = u64;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    handlers: Mutex<Vec<(ObserverToken, Handler<E>)>>,
    next_token: AtomicU64,
}

/// A cheaply-cloneable handle to a pub/sub bus for events of type `E`.
pub struct EventBus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Registers `handler`, returning a token that can be passed to [`Self::off`].
    pub fn on(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> ObserverToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .push((token, Arc::new(handler)));
        token
    }

    /// Deregisters a single handler. Returns `false` if the token was unknown
    /// (already removed, or never registered).
    pub fn off(&self, token: ObserverToken) -> bool {
        let mut handlers = self.inner.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    /// Creates a [`CancellationHandle`] scoped to this bus: handlers
    /// registered through the handle are all detached together when the
    /// handle is aborted — a scoped unsubscribe primitive.
    pub fn scope(&self) -> CancellationHandle<E> {
        CancellationHandle {
            bus: self.clone(),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Number of currently registered handlers (test/diagnostic use).
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl<E: Clone> EventBus<E> {
    /// Invokes every registered handler with `event`, in registration order.
    pub fn emit(&self, event: E) {
        let handlers: Vec<Handler<E>> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                log::error!("event handler panicked; continuing delivery to remaining handlers");
            }
        }
    }
}

/// Groups a set of handler registrations so they can be detached together.
/// Mirrors an AbortSignal: call [`Self::abort`] (or drop the handle after
/// calling it) to unsubscribe everything registered through it.
pub struct CancellationHandle<E> {
    bus: EventBus<E>,
    tokens: Mutex<Vec<ObserverToken>>,
}

impl<E> CancellationHandle<E> {
    pub fn on(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> ObserverToken {
        let token = self.bus.on(handler);
        self.tokens.lock().push(token);
        token
    }

    /// Detaches every handler registered through this handle.
    pub fn abort(&self) {
        let tokens: Vec<ObserverToken> = std::mem::take(&mut self.tokens.lock());
        for token in tokens {
            self.bus.off(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_calls_handlers_in_registration_order() {
        let bus: EventBus<i32> = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on(move |v| o1.lock().push((1, *v)));
        let o2 = order.clone();
        bus.on(move |v| o2.lock().push((2, *v)));
        bus.emit(42);
        assert_eq!(*order.lock(), vec![(1, 42), (2, 42)]);
    }

    #[test]
    fn off_detaches_a_single_handler() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let token = bus.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(1);
        assert!(bus.off(token));
        bus.emit(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_handle_detaches_all_its_handlers() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let scope = bus.scope();
        for _ in 0..3 {
            let c = count.clone();
            scope.on(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(1);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        scope.abort();
        bus.emit(2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_panicking_handler_does_not_stop_later_handlers() {
        let bus: EventBus<i32> = EventBus::new();
        bus.on(|_| panic!("boom"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
