//! Iterative asynchronous map/reduce coordination
//!
//! A [`Coordinator`] dispatches keys to a caller-supplied mapping function,
//! tracks the promises that come back, folds their settlements through a
//! reduce function, and runs an end phase once nothing is outstanding. The
//! reduce and end callbacks can feed new keys back into the mapper,
//! re-entering the cycle until no work remains. At that point the
//! coordinator, itself a promise, resolves with the final accumulator.
//!
//! All internal transitions run on explicit FIFO queues drained by a single
//! pump loop guarded by a re-entrancy flag, so feed-forward from inside a
//! callback and synchronous settlement of pre-resolved promises never grow
//! the stack.

mod types;

pub use types::{Dispatch, Feed, Finisher, Mapper, Reducer};

use crate::promise::{Promise, PromiseState};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace};

type KeyEq<K> = Rc<dyn Fn(&K, &K) -> bool>;

enum Settlement<K, T, E> {
    Resolved(K, Rc<T>),
    Rejected(K, Rc<E>),
}

struct Inner<K, T, E, A> {
    mapper: Option<Mapper<K, T, E>>,
    reducer: Option<Reducer<K, T, A>>,
    finisher: Option<Finisher<K, A>>,
    key_eq: KeyEq<K>,
    /// Keys handed to the mapping function, in dispatch order. Scanned
    /// linearly with `key_eq` for dedup.
    dispatched: Vec<K>,
    /// Dispatched keys whose promise has not yet settled.
    outstanding: usize,
    accumulator: Option<A>,
    resolved_keys: Vec<K>,
    rejected_keys: Vec<K>,
    /// Settlements waiting for a reduce function to be attached.
    pending_reduce: VecDeque<(K, Rc<T>)>,
    /// Keys accepted but not yet run through the mapping function.
    dispatch_queue: VecDeque<K>,
    /// Settlements delivered but not yet bookkept, in delivery order.
    settlements: VecDeque<Settlement<K, T, E>>,
    end_triggered: bool,
    started: bool,
    pumping: bool,
    done: Promise<A, E>,
}

impl<K: Clone + 'static, T: 'static, E: 'static, A: 'static> Inner<K, T, E, A> {
    fn already_dispatched(&self, key: &K) -> bool {
        self.dispatched.iter().any(|seen| (self.key_eq)(seen, key))
    }

    /// Accept a key for dispatch unless it was already dispatched under
    /// the active equality rule.
    fn enqueue_key(&mut self, key: K) -> bool {
        if self.already_dispatched(&key) {
            trace!("key refused: already dispatched");
            return false;
        }
        self.dispatched.push(key.clone());
        self.dispatch_queue.push_back(key);
        true
    }

    /// The coordinator's own promise has settled or been cancelled:
    /// reduce/end bookkeeping is over.
    fn halted(&self) -> bool {
        self.done.is_settled() || self.done.is_cancelled()
    }

    fn finish_ready(&self) -> bool {
        self.started
            && self.outstanding == 0
            && self.settlements.is_empty()
            && self.dispatch_queue.is_empty()
            && self.pending_reduce.is_empty()
            && !self.halted()
    }
}

/// Iterative map/reduce coordinator.
///
/// `K` is the work key, `T` the mapped success value, `E` the rejection
/// value, and `A` the accumulator threaded through the reduce function.
/// The coordinator is itself a promise over `A`/`E`: its settlement is the
/// overall process outcome.
pub struct Coordinator<K, T, E, A> {
    inner: Rc<RefCell<Inner<K, T, E, A>>>,
}

impl<K, T, E, A> Clone for Coordinator<K, T, E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: Clone + 'static, T: 'static, E: 'static, A: 'static> Coordinator<K, T, E, A> {
    /// Create a coordinator with no initial keys, deduplicating with the
    /// key type's own equality.
    pub fn new(seed: A) -> Self
    where
        K: PartialEq,
    {
        Self::with_equality(seed, std::iter::empty(), |a: &K, b: &K| a == b)
    }

    /// Create a coordinator seeded with an initial key sequence. The
    /// dedup rule applies to the initial sequence as well.
    pub fn with_keys(seed: A, keys: impl IntoIterator<Item = K>) -> Self
    where
        K: PartialEq,
    {
        Self::with_equality(seed, keys, |a: &K, b: &K| a == b)
    }

    /// Create a coordinator with an explicit key-equality strategy used
    /// for dedup only; it has no bearing on ordering.
    pub fn with_equality(
        seed: A,
        keys: impl IntoIterator<Item = K>,
        key_eq: impl Fn(&K, &K) -> bool + 'static,
    ) -> Self {
        let coordinator = Self {
            inner: Rc::new(RefCell::new(Inner {
                mapper: None,
                reducer: None,
                finisher: None,
                key_eq: Rc::new(key_eq),
                dispatched: Vec::new(),
                outstanding: 0,
                accumulator: Some(seed),
                resolved_keys: Vec::new(),
                rejected_keys: Vec::new(),
                pending_reduce: VecDeque::new(),
                dispatch_queue: VecDeque::new(),
                settlements: VecDeque::new(),
                end_triggered: false,
                started: false,
                pumping: false,
                done: Promise::new(),
            })),
        };
        {
            let mut inner = coordinator.inner.borrow_mut();
            for key in keys {
                inner.enqueue_key(key);
            }
        }
        coordinator
    }

    /// Attach the mapping function. May be called before or after
    /// `start`; queued keys dispatch as soon as both are in place.
    pub fn map_with(&self, mapper: impl FnMut(&K) -> Option<Dispatch<T, E>> + 'static) -> &Self {
        self.inner.borrow_mut().mapper = Some(Box::new(mapper));
        pump(&self.inner);
        self
    }

    /// Attach the reduce function. Settlements buffered while no reducer
    /// was attached are drained through it in FIFO order before this
    /// returns.
    pub fn reduce_with(
        &self,
        reducer: impl FnMut(A, &T, &mut Feed<'_, K>, &K, &[K], &[K]) -> A + 'static,
    ) -> &Self {
        self.inner.borrow_mut().reducer = Some(Box::new(reducer));
        pump(&self.inner);
        self
    }

    /// Attach the end function. If the no-work-left condition was already
    /// reached, it fires immediately and synchronously.
    pub fn finish_with(&self, finisher: impl FnMut(&A, &mut Feed<'_, K>, &[K], &[K]) + 'static) -> &Self {
        self.inner.borrow_mut().finisher = Some(Box::new(finisher));
        pump(&self.inner);
        self
    }

    /// Begin processing. Keys queued up to now dispatch once a mapping
    /// function is attached; an empty key set goes straight to the end
    /// phase. Subsequent calls are no-ops.
    pub fn start(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.started {
                return;
            }
            inner.started = true;
            debug!(
                "coordinator started with {} queued key(s)",
                inner.dispatch_queue.len()
            );
        }
        pump(&self.inner);
    }

    /// Submit a key for dispatch. Returns `false`, without invoking the
    /// mapping function, if an equal key was already dispatched.
    pub fn dispatch(&self, key: K) -> bool {
        let accepted = self.inner.borrow_mut().enqueue_key(key);
        if accepted {
            pump(&self.inner);
        }
        accepted
    }

    /// The coordinator's own promise; settles with the overall outcome.
    pub fn promise(&self) -> Promise<A, E> {
        self.inner.borrow().done.clone()
    }

    /// Register a handler for the overall process resolving.
    pub fn on_resolve(&self, handler: impl FnOnce(&A) + 'static) {
        self.promise().on_resolve(handler);
    }

    /// Register a handler for the overall process rejecting.
    pub fn on_reject(&self, handler: impl FnOnce(&E) + 'static) {
        self.promise().on_reject(handler);
    }

    /// Manually resolve the overall process. Later settlements of
    /// still-outstanding dispatches are observed but ignored.
    pub fn resolve(&self, value: A) {
        self.promise().resolve(value);
    }

    /// Manually reject the overall process.
    pub fn reject(&self, error: E) {
        self.promise().reject(error);
    }

    /// Cancel the overall process: no further handler firing, no further
    /// reduce/end bookkeeping. Already-dispatched operations are not
    /// stopped; their settlements are silently absorbed.
    pub fn cancel(&self) {
        self.promise().cancel();
    }

    pub fn state(&self) -> PromiseState {
        self.promise().state()
    }

    pub fn is_settled(&self) -> bool {
        self.promise().is_settled()
    }

    pub fn is_resolved(&self) -> bool {
        self.promise().is_resolved()
    }

    pub fn is_rejected(&self) -> bool {
        self.promise().is_rejected()
    }

    /// The final accumulator, once resolved.
    pub fn value(&self) -> Option<Rc<A>> {
        self.promise().value()
    }

    pub fn error(&self) -> Option<Rc<E>> {
        self.promise().error()
    }

    /// Number of dispatched keys whose promise has not yet settled.
    pub fn outstanding(&self) -> usize {
        self.inner.borrow().outstanding
    }

    /// Keys whose promises settled resolved, in settlement order.
    pub fn resolved_keys(&self) -> Vec<K> {
        self.inner.borrow().resolved_keys.clone()
    }

    /// Keys whose promises settled rejected, in settlement order.
    pub fn rejected_keys(&self) -> Vec<K> {
        self.inner.borrow().rejected_keys.clone()
    }

    /// Whether the no-work-left condition has been reached at least once.
    pub fn end_reached(&self) -> bool {
        self.inner.borrow().end_triggered
    }
}

enum Step<K, T, E> {
    Settle(Settlement<K, T, E>),
    Dispatch(K),
    Reduce(K, Rc<T>),
    Finish,
    Idle,
}

/// Drain the work queues until nothing is runnable. Re-entrant calls
/// (from feed-forward, from synchronously settling promises) return
/// immediately; the outermost pump picks their work up.
fn pump<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
) {
    {
        let mut guard = inner.borrow_mut();
        if guard.pumping || !guard.started {
            return;
        }
        guard.pumping = true;
    }
    loop {
        match next_step(inner) {
            Step::Settle(settlement) => apply_settlement(inner, settlement),
            Step::Dispatch(key) => run_dispatch(inner, key),
            Step::Reduce(key, value) => run_reduce(inner, key, value),
            Step::Finish => {
                if !run_finish(inner) {
                    // No end function yet: the finishing state persists
                    // and fires when one is attached.
                    break;
                }
            }
            Step::Idle => break,
        }
    }
    inner.borrow_mut().pumping = false;
}

fn next_step<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
) -> Step<K, T, E> {
    let mut guard = inner.borrow_mut();
    if let Some(settlement) = guard.settlements.pop_front() {
        return Step::Settle(settlement);
    }
    if guard.mapper.is_some() {
        if let Some(key) = guard.dispatch_queue.pop_front() {
            return Step::Dispatch(key);
        }
    }
    if guard.reducer.is_some() && !guard.halted() {
        if let Some((key, value)) = guard.pending_reduce.pop_front() {
            return Step::Reduce(key, value);
        }
    }
    if guard.finish_ready() {
        return Step::Finish;
    }
    Step::Idle
}

fn apply_settlement<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
    settlement: Settlement<K, T, E>,
) {
    let reduce_now = {
        let mut guard = inner.borrow_mut();
        if guard.halted() {
            trace!("settlement observed after coordinator settled: ignored");
            return;
        }
        match settlement {
            Settlement::Resolved(key, value) => {
                guard.outstanding = guard.outstanding.saturating_sub(1);
                guard.resolved_keys.push(key.clone());
                if guard.reducer.is_some() {
                    Some((key, value))
                } else {
                    trace!("no reduce function attached: buffering settlement");
                    guard.pending_reduce.push_back((key, value));
                    None
                }
            }
            Settlement::Rejected(key, _error) => {
                guard.outstanding = guard.outstanding.saturating_sub(1);
                debug!("dispatched operation rejected: recorded for the end phase");
                guard.rejected_keys.push(key);
                None
            }
        }
    };
    if let Some((key, value)) = reduce_now {
        run_reduce(inner, key, value);
    }
}

fn run_dispatch<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
    key: K,
) {
    let mapper = inner.borrow_mut().mapper.take();
    let Some(mut mapper) = mapper else {
        inner.borrow_mut().dispatch_queue.push_front(key);
        return;
    };
    trace!("dispatching key to the mapping function");
    let outcome = mapper(&key);
    {
        let mut guard = inner.borrow_mut();
        if guard.mapper.is_none() {
            guard.mapper = Some(mapper);
        }
    }
    let Some(outcome) = outcome else {
        trace!("mapping function returned nothing to track");
        return;
    };
    let promise = outcome.into_promise();
    inner.borrow_mut().outstanding += 1;

    let handle = Rc::clone(inner);
    let resolved_key = key.clone();
    promise.on_resolve_shared(move |value| {
        handle
            .borrow_mut()
            .settlements
            .push_back(Settlement::Resolved(resolved_key, value));
        pump(&handle);
    });
    let handle = Rc::clone(inner);
    promise.on_reject_shared(move |error| {
        handle
            .borrow_mut()
            .settlements
            .push_back(Settlement::Rejected(key, error));
        pump(&handle);
    });
}

fn make_feed<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: Rc<RefCell<Inner<K, T, E, A>>>,
) -> impl FnMut(K) -> bool {
    move |key| inner.borrow_mut().enqueue_key(key)
}

fn run_reduce<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
    key: K,
    value: Rc<T>,
) {
    let (mut reducer, accumulator, resolved, rejected) = {
        let mut guard = inner.borrow_mut();
        match (guard.reducer.take(), guard.accumulator.take()) {
            (Some(reducer), Some(accumulator)) => (
                reducer,
                accumulator,
                std::mem::take(&mut guard.resolved_keys),
                std::mem::take(&mut guard.rejected_keys),
            ),
            (reducer, accumulator) => {
                guard.reducer = reducer;
                guard.accumulator = accumulator;
                guard.pending_reduce.push_back((key, value));
                return;
            }
        }
    };

    // No coordinator borrow is held across the callback: the reducer may
    // feed keys, attach callbacks, or settle the coordinator.
    let mut feed_fn = make_feed(Rc::clone(inner));
    let mut feed = Feed { feed: &mut feed_fn };
    let next = reducer(accumulator, &value, &mut feed, &key, &resolved, &rejected);

    let mut guard = inner.borrow_mut();
    guard.accumulator = Some(next);
    let mut restored = resolved;
    restored.extend(guard.resolved_keys.drain(..));
    guard.resolved_keys = restored;
    let mut restored = rejected;
    restored.extend(guard.rejected_keys.drain(..));
    guard.rejected_keys = restored;
    // The callback may have attached a replacement reducer; keep it.
    if guard.reducer.is_none() {
        guard.reducer = Some(reducer);
    }
}

/// Run the end phase. Returns `false` when no end function is attached,
/// leaving the finishing state latched.
fn run_finish<K: Clone + 'static, T: 'static, E: 'static, A: 'static>(
    inner: &Rc<RefCell<Inner<K, T, E, A>>>,
) -> bool {
    let taken = {
        let mut guard = inner.borrow_mut();
        if !guard.end_triggered {
            guard.end_triggered = true;
            debug!(
                "no work outstanding: end phase reached ({} resolved, {} rejected)",
                guard.resolved_keys.len(),
                guard.rejected_keys.len()
            );
        }
        match (guard.finisher.take(), guard.accumulator.take()) {
            (Some(finisher), Some(accumulator)) => Some((
                finisher,
                accumulator,
                std::mem::take(&mut guard.resolved_keys),
                std::mem::take(&mut guard.rejected_keys),
            )),
            (finisher, accumulator) => {
                guard.finisher = finisher;
                guard.accumulator = accumulator;
                None
            }
        }
    };
    let Some((mut finisher, accumulator, resolved, rejected)) = taken else {
        return false;
    };

    let mut feed_fn = make_feed(Rc::clone(inner));
    let mut feed = Feed { feed: &mut feed_fn };
    finisher(&accumulator, &mut feed, &resolved, &rejected);

    let auto_resolve = {
        let mut guard = inner.borrow_mut();
        guard.accumulator = Some(accumulator);
        let mut restored = resolved;
        restored.extend(guard.resolved_keys.drain(..));
        guard.resolved_keys = restored;
        let mut restored = rejected;
        restored.extend(guard.rejected_keys.drain(..));
        guard.rejected_keys = restored;
        if guard.finisher.is_none() {
            guard.finisher = Some(finisher);
        }

        let fed = guard.outstanding > 0
            || !guard.dispatch_queue.is_empty()
            || !guard.settlements.is_empty();
        if fed {
            debug!("end phase fed new keys: process continues");
            None
        } else if guard.halted() {
            None
        } else {
            guard.accumulator.take().map(|value| (guard.done.clone(), value))
        }
    };
    if let Some((done, value)) = auto_resolve {
        debug!("auto-resolving coordinator with the final accumulator");
        done.resolve(value);
    }
    true
}
