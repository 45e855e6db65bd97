//! Single-assignment asynchronous result container
//!
//! A [`Promise`] starts pending and settles at most once, either resolved
//! with a success value or rejected with a rejection value. Settlement
//! callbacks registered before the fact fire synchronously, in registration
//! order, at the moment of settlement; callbacks registered after the fact
//! fire immediately with the captured value. Cancellation freezes the
//! promise where it stands and suppresses all further handler firing.
//!
//! Handles are cheap clones of shared single-threaded state: hand one to
//! the producer and keep one for the consumers.

mod registry;
mod state;

pub mod join;

pub use state::PromiseState;

use registry::HandlerRegistry;
use state::StateCell;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// Outcome of a [`Promise::chain`] handler.
///
/// Determines how the derived promise settles: a plain value resolves it,
/// an error value rejects it, and a promise is adopted: the derived
/// promise mirrors its eventual settlement.
pub enum Chained<T, E> {
    /// Resolve the derived promise with this value.
    Value(T),
    /// Reject the derived promise with this value.
    Error(E),
    /// Adopt this promise's eventual settlement.
    Promise(Promise<T, E>),
}

struct Inner<T, E> {
    state: StateCell,
    value: Option<Rc<T>>,
    error: Option<Rc<E>>,
    on_resolve: HandlerRegistry<T>,
    on_reject: HandlerRegistry<E>,
}

/// Single-assignment asynchronous result container.
///
/// `T` is the success value, `E` the rejection value (defaulting to `T`
/// for the common symmetric case).
pub struct Promise<T, E = T> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// What to do with a handler registered against the current state.
enum Disposition<V> {
    Fire(Rc<V>),
    Wait,
    Discard,
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: StateCell::new(),
                value: None,
                error: None,
                on_resolve: HandlerRegistry::new(),
                on_reject: HandlerRegistry::new(),
            })),
        }
    }

    /// Create a promise already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    /// Create a promise already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let promise = Self::new();
        promise.reject(error);
        promise
    }

    /// Settle the promise resolved. The first settlement wins; every later
    /// `resolve` or `reject` call is a no-op.
    pub fn resolve(&self, value: T) {
        self.resolve_shared(Rc::new(value));
    }

    /// Settle the promise rejected. Same first-call-wins rule as `resolve`.
    pub fn reject(&self, error: E) {
        self.reject_shared(Rc::new(error));
    }

    pub(crate) fn resolve_shared(&self, value: Rc<T>) {
        let handlers = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.settle(PromiseState::Resolved) {
                trace!("resolve ignored: promise already settled or cancelled");
                return;
            }
            inner.value = Some(value.clone());
            inner.on_reject.clear();
            inner.on_resolve.drain()
        };
        // No borrow is held here: handlers may freely re-enter the promise.
        for handler in handlers {
            handler(value.clone());
        }
    }

    pub(crate) fn reject_shared(&self, error: Rc<E>) {
        let handlers = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.settle(PromiseState::Rejected) {
                trace!("reject ignored: promise already settled or cancelled");
                return;
            }
            inner.error = Some(error.clone());
            inner.on_resolve.clear();
            inner.on_reject.drain()
        };
        for handler in handlers {
            handler(error.clone());
        }
    }

    /// Register a resolve handler. Fires immediately (and synchronously)
    /// if the promise is already resolved; registering after settlement is
    /// never an error.
    pub fn on_resolve(&self, handler: impl FnOnce(&T) + 'static) {
        self.on_resolve_shared(move |value| handler(&value));
    }

    /// Register a reject handler. Mirror of [`Promise::on_resolve`].
    pub fn on_reject(&self, handler: impl FnOnce(&E) + 'static) {
        self.on_reject_shared(move |error| handler(&error));
    }

    pub(crate) fn on_resolve_shared(&self, handler: impl FnOnce(Rc<T>) + 'static) {
        let disposition = {
            let inner = self.inner.borrow();
            if inner.state.is_cancelled() {
                Disposition::Discard
            } else {
                match inner.state.current() {
                    PromiseState::Resolved => match inner.value.clone() {
                        Some(value) => Disposition::Fire(value),
                        None => Disposition::Discard,
                    },
                    PromiseState::Rejected => Disposition::Discard,
                    PromiseState::Pending => Disposition::Wait,
                }
            }
        };
        match disposition {
            Disposition::Fire(value) => handler(value),
            Disposition::Wait => self.inner.borrow_mut().on_resolve.push(Box::new(handler)),
            Disposition::Discard => {}
        }
    }

    pub(crate) fn on_reject_shared(&self, handler: impl FnOnce(Rc<E>) + 'static) {
        let disposition = {
            let inner = self.inner.borrow();
            if inner.state.is_cancelled() {
                Disposition::Discard
            } else {
                match inner.state.current() {
                    PromiseState::Rejected => match inner.error.clone() {
                        Some(error) => Disposition::Fire(error),
                        None => Disposition::Discard,
                    },
                    PromiseState::Resolved => Disposition::Discard,
                    PromiseState::Pending => Disposition::Wait,
                }
            }
        };
        match disposition {
            Disposition::Fire(error) => handler(error),
            Disposition::Wait => self.inner.borrow_mut().on_reject.push(Box::new(handler)),
            Disposition::Discard => {}
        }
    }

    /// Freeze the promise in its current state. No handler fires from this
    /// point on, whether already registered or registered later against
    /// an already-settled state, and resolve/reject become no-ops.
    pub fn cancel(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state.cancel();
        inner.on_resolve.clear();
        inner.on_reject.clear();
    }

    /// Derive a new promise whose settlement is computed from this one's.
    ///
    /// The handler for the branch this promise settles in decides the
    /// derived promise's fate via [`Chained`].
    pub fn chain<FR, FJ>(&self, on_resolve: FR, on_reject: FJ) -> Promise<T, E>
    where
        FR: FnOnce(&T) -> Chained<T, E> + 'static,
        FJ: FnOnce(&E) -> Chained<T, E> + 'static,
    {
        let next = Promise::new();
        let derived = next.clone();
        self.on_resolve_shared(move |value| apply_chained(on_resolve(&value), &derived));
        let derived = next.clone();
        self.on_reject_shared(move |error| apply_chained(on_reject(&error), &derived));
        next
    }

    /// [`Promise::chain`] with only the resolve branch handled; rejection
    /// passes through to the derived promise unchanged.
    pub fn chain_resolve<FR>(&self, on_resolve: FR) -> Promise<T, E>
    where
        FR: FnOnce(&T) -> Chained<T, E> + 'static,
    {
        let next = Promise::new();
        let derived = next.clone();
        self.on_resolve_shared(move |value| apply_chained(on_resolve(&value), &derived));
        let derived = next.clone();
        self.on_reject_shared(move |error| derived.reject_shared(error));
        next
    }

    /// [`Promise::chain`] with only the reject branch handled; resolution
    /// passes through to the derived promise unchanged.
    pub fn chain_reject<FJ>(&self, on_reject: FJ) -> Promise<T, E>
    where
        FJ: FnOnce(&E) -> Chained<T, E> + 'static,
    {
        let next = Promise::new();
        let derived = next.clone();
        self.on_resolve_shared(move |value| derived.resolve_shared(value));
        let derived = next.clone();
        self.on_reject_shared(move |error| apply_chained(on_reject(&error), &derived));
        next
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state.current()
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == PromiseState::Resolved
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == PromiseState::Rejected
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().state.is_cancelled()
    }

    /// The captured success value, if resolved.
    pub fn value(&self) -> Option<Rc<T>> {
        self.inner.borrow().value.clone()
    }

    /// The captured rejection value, if rejected.
    pub fn error(&self) -> Option<Rc<E>> {
        self.inner.borrow().error.clone()
    }
}

impl<T: 'static, E: 'static> Default for Promise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_chained<T: 'static, E: 'static>(outcome: Chained<T, E>, derived: &Promise<T, E>) {
    match outcome {
        Chained::Value(value) => derived.resolve(value),
        Chained::Error(error) => derived.reject(error),
        Chained::Promise(adopted) => {
            let target = derived.clone();
            adopted.on_resolve_shared(move |value| target.resolve_shared(value));
            let target = derived.clone();
            adopted.on_reject_shared(move |error| target.reject_shared(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let promise: Promise<String> = Promise::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            promise.on_resolve(move |value| seen.borrow_mut().push(format!("{tag}:{value}")));
        }

        promise.resolve("done".to_string());

        assert_eq!(*seen.borrow(), vec!["a:done", "b:done", "c:done"]);
    }

    #[test]
    fn test_first_settlement_wins() {
        let promise: Promise<u32, String> = Promise::new();
        let resolutions = Rc::new(RefCell::new(0));
        let rejections = Rc::new(RefCell::new(0));
        {
            let resolutions = resolutions.clone();
            promise.on_resolve(move |_| *resolutions.borrow_mut() += 1);
        }
        {
            let rejections = rejections.clone();
            promise.on_reject(move |_| *rejections.borrow_mut() += 1);
        }

        promise.resolve(1);
        promise.reject("late".to_string());
        promise.resolve(2);

        assert_eq!(*resolutions.borrow(), 1);
        assert_eq!(*rejections.borrow(), 0);
        assert_eq!(promise.value().as_deref(), Some(&1));
        assert!(promise.error().is_none());
    }

    #[test]
    fn test_late_registration_fires_immediately() {
        let promise: Promise<&'static str> = Promise::resolved("early");
        let seen = Rc::new(RefCell::new(None));
        {
            let seen = seen.clone();
            promise.on_resolve(move |value| *seen.borrow_mut() = Some(*value));
        }
        assert_eq!(*seen.borrow(), Some("early"));
    }

    #[test]
    fn test_cancel_suppresses_all_firing() {
        let promise: Promise<u32> = Promise::new();
        let fired = Rc::new(RefCell::new(false));
        {
            let fired = fired.clone();
            promise.on_resolve(move |_| *fired.borrow_mut() = true);
        }

        promise.cancel();
        promise.resolve(1);

        assert!(!*fired.borrow());
        assert!(!promise.is_settled());
        assert!(promise.is_cancelled());

        // Late registration against a cancelled promise never fires either.
        let late = Rc::new(RefCell::new(false));
        {
            let late = late.clone();
            promise.on_resolve(move |_| *late.borrow_mut() = true);
        }
        assert!(!*late.borrow());
    }

    #[test]
    fn test_cancel_after_settlement_blocks_late_handlers() {
        let promise: Promise<u32> = Promise::resolved(9);
        promise.cancel();
        let fired = Rc::new(RefCell::new(false));
        {
            let fired = fired.clone();
            promise.on_resolve(move |_| *fired.borrow_mut() = true);
        }
        assert!(!*fired.borrow());
        assert!(promise.is_resolved());
    }

    #[test]
    fn test_handler_reentry_is_a_noop() {
        let promise: Promise<u32> = Promise::new();
        let count = Rc::new(RefCell::new(0));
        {
            let count = count.clone();
            let again = promise.clone();
            promise.on_resolve(move |value| {
                *count.borrow_mut() += 1;
                // Re-entrant settlement attempts are silently ignored.
                again.resolve(value + 1);
            });
        }

        promise.resolve(10);

        assert_eq!(*count.borrow(), 1);
        assert_eq!(promise.value().as_deref(), Some(&10));
    }

    #[test]
    fn test_chain_value_resolves_derived() {
        let promise: Promise<String> = Promise::new();
        let derived = promise.chain(
            |value| Chained::Value(format!("{value}!")),
            |error| Chained::Error(error.clone()),
        );

        promise.resolve("hi".to_string());

        assert_eq!(derived.value().as_deref().map(String::as_str), Some("hi!"));
    }

    #[test]
    fn test_chain_error_rejects_derived() {
        let promise: Promise<String> = Promise::new();
        let derived = promise.chain_resolve(|_| Chained::Error("bad".to_string()));

        promise.resolve("ok".to_string());

        assert!(derived.is_rejected());
        assert_eq!(derived.error().as_deref().map(String::as_str), Some("bad"));
    }

    #[test]
    fn test_chain_adopts_returned_promise() {
        let promise: Promise<u32> = Promise::new();
        let adopted: Promise<u32> = Promise::new();
        let derived = {
            let adopted = adopted.clone();
            promise.chain_resolve(move |_| Chained::Promise(adopted))
        };

        promise.resolve(1);
        assert!(!derived.is_settled());

        adopted.resolve(42);
        assert_eq!(derived.value().as_deref(), Some(&42));
    }

    #[test]
    fn test_chain_passthrough_on_unhandled_branch() {
        let promise: Promise<u32, String> = Promise::new();
        let derived = promise.chain_resolve(|value| Chained::Value(value * 2));

        promise.reject("down".to_string());

        assert!(derived.is_rejected());
        assert_eq!(derived.error().as_deref().map(String::as_str), Some("down"));
    }
}
