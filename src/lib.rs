//! # Ripple
//!
//! Iterative asynchronous map/reduce coordination built on a
//! single-assignment promise.
//!
//! A [`Promise`] is a result container that settles at most once, resolved
//! or rejected, firing callbacks synchronously in registration order. A
//! [`Coordinator`] drives work keys through a caller-supplied mapping
//! function, folds the resulting settlements with a reduce function, and
//! lets reduce or the end phase feed new keys back in until no work
//! remains; the coordinator then resolves, as a promise itself, with the
//! final accumulator.
//!
//! The model is single-threaded and cooperative: no locks, no threads,
//! all mutation happens synchronously inside settlement handling. The
//! crate sequences already-asynchronous operations supplied by the
//! caller; it performs no I/O and enforces no timeouts.
//!
//! ## Modules
//!
//! - `promise` - single-assignment result container, chaining, and the
//!   `join` combinators (all / some / at_least / map_collect)
//! - `coordinator` - the iterative map/reduce coordinator

pub mod coordinator;
pub mod promise;

pub use coordinator::{Coordinator, Dispatch, Feed};
pub use promise::{Chained, Promise, PromiseState};
