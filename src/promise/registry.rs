//! Handler registration for promise settlement
//!
//! The minimal subscribe/fire contract a promise needs: callbacks are
//! stored in registration order and drained exactly once at settlement.
//! Handlers receive the settlement value behind an `Rc` so that every
//! subscriber, including ones registered after the fact, observes the
//! same captured value.

use std::rc::Rc;

type Handler<T> = Box<dyn FnOnce(Rc<T>)>;

/// Ordered list of one-shot settlement callbacks.
pub(crate) struct HandlerRegistry<T> {
    waiting: Vec<Handler<T>>,
}

impl<T> HandlerRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiting: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handler: Handler<T>) {
        self.waiting.push(handler);
    }

    /// Remove and return every registered handler, preserving order.
    pub(crate) fn drain(&mut self) -> Vec<Handler<T>> {
        std::mem::take(&mut self.waiting)
    }

    /// Drop all registered handlers without invoking them.
    pub(crate) fn clear(&mut self) {
        self.waiting.clear();
    }
}
