//! Callback and outcome types for the coordinator
//!
//! The boundary surface a caller plugs into the coordinator: what the
//! mapping function may hand back for a key, and the feed-forward
//! capability reduce/finish callbacks use to register more keys.

use crate::promise::Promise;

/// What a mapping function hands back for a dispatched key.
///
/// A mapper returning `None` instead means there is nothing to track for
/// the key: it counts as dispatched but never as outstanding.
pub enum Dispatch<T, E> {
    /// Track this promise's eventual settlement.
    Promise(Promise<T, E>),
    /// An immediate result, coerced to an already-resolved promise.
    Value(T),
}

impl<T: 'static, E: 'static> Dispatch<T, E> {
    pub(crate) fn into_promise(self) -> Promise<T, E> {
        match self {
            Dispatch::Promise(promise) => promise,
            Dispatch::Value(value) => Promise::resolved(value),
        }
    }
}

impl<T, E> From<Promise<T, E>> for Dispatch<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Dispatch::Promise(promise)
    }
}

/// Feed-forward capability handed to reduce and finish callbacks.
///
/// Keys fed here are dispatched as soon as the callback returns, extending
/// the process. The boolean mirrors the dedup rule: `false` means the key
/// was already dispatched and nothing happens.
pub struct Feed<'a, K> {
    pub(crate) feed: &'a mut dyn FnMut(K) -> bool,
}

impl<K> Feed<'_, K> {
    /// Attempt to dispatch another key.
    pub fn feed(&mut self, key: K) -> bool {
        (self.feed)(key)
    }
}

/// Mapping function: key in, optionally something to track out.
pub type Mapper<K, T, E> = Box<dyn FnMut(&K) -> Option<Dispatch<T, E>>>;

/// Reduce function: folds one settlement into the accumulator. Receives
/// the accumulator, the settlement value, feed-forward, the originating
/// key, and the resolved/rejected key sequences so far.
pub type Reducer<K, T, A> = Box<dyn FnMut(A, &T, &mut Feed<'_, K>, &K, &[K], &[K]) -> A>;

/// End function: runs when no work is left. Receives the accumulator,
/// feed-forward, and the resolved/rejected key sequences.
pub type Finisher<K, A> = Box<dyn FnMut(&A, &mut Feed<'_, K>, &[K], &[K])>;
