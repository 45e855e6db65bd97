//! Combinators over collections of promises
//!
//! Convenience consumers of the promise contract: wait for all, wait for
//! the first `n`, require at least `n`, and map-then-collect. Values are
//! handed back as the shared `Rc`s the promises captured at settlement.

use super::Promise;
use std::cell::RefCell;
use std::rc::Rc;

struct AllState<T> {
    values: Vec<Option<Rc<T>>>,
    remaining: usize,
}

/// Resolve with every value, in input order, once all promises resolve.
/// Rejects with the first rejection. An empty input resolves immediately.
pub fn all<T: 'static, E: 'static>(promises: Vec<Promise<T, E>>) -> Promise<Vec<Rc<T>>, E> {
    let result: Promise<Vec<Rc<T>>, E> = Promise::new();
    let total = promises.len();
    if total == 0 {
        result.resolve(Vec::new());
        return result;
    }
    let state = Rc::new(RefCell::new(AllState {
        values: vec![None; total],
        remaining: total,
    }));
    for (index, promise) in promises.iter().enumerate() {
        let state = state.clone();
        let settled = result.clone();
        promise.on_resolve_shared(move |value| {
            let finished = {
                let mut state = state.borrow_mut();
                state.values[index] = Some(value);
                state.remaining -= 1;
                state.remaining == 0
            };
            if finished {
                let values = state.borrow_mut().values.drain(..).flatten().collect();
                settled.resolve(values);
            }
        });
        let settled = result.clone();
        promise.on_reject_shared(move |error| settled.reject_shared(error));
    }
    result
}

struct TallyState<T, E> {
    values: Vec<Rc<T>>,
    errors: Vec<Rc<E>>,
}

/// Resolve with the first `n` values in settlement order; reject with the
/// collected rejections once `n` successes become impossible. `n` is
/// clamped to the number of promises supplied.
pub fn some<T: 'static, E: 'static>(
    promises: Vec<Promise<T, E>>,
    n: usize,
) -> Promise<Vec<Rc<T>>, Vec<Rc<E>>> {
    let result: Promise<Vec<Rc<T>>, Vec<Rc<E>>> = Promise::new();
    let total = promises.len();
    let needed = n.min(total);
    if needed == 0 {
        result.resolve(Vec::new());
        return result;
    }
    let state = Rc::new(RefCell::new(TallyState {
        values: Vec::new(),
        errors: Vec::new(),
    }));
    let allowed_failures = total - needed;
    for promise in &promises {
        let tally = state.clone();
        let settled = result.clone();
        promise.on_resolve_shared(move |value| {
            let enough = {
                let mut tally = tally.borrow_mut();
                tally.values.push(value);
                tally.values.len() == needed
            };
            if enough {
                let values = std::mem::take(&mut tally.borrow_mut().values);
                settled.resolve(values);
            }
        });
        let state = state.clone();
        let settled = result.clone();
        promise.on_reject_shared(move |error| {
            let doomed = {
                let mut state = state.borrow_mut();
                state.errors.push(error);
                state.errors.len() > allowed_failures
            };
            if doomed {
                let errors = std::mem::take(&mut state.borrow_mut().errors);
                settled.reject(errors);
            }
        });
    }
    result
}

/// Wait for every promise to settle; resolve with all collected values if
/// at least `n` of them resolved, otherwise reject with the rejections.
pub fn at_least<T: 'static, E: 'static>(
    promises: Vec<Promise<T, E>>,
    n: usize,
) -> Promise<Vec<Rc<T>>, Vec<Rc<E>>> {
    let result: Promise<Vec<Rc<T>>, Vec<Rc<E>>> = Promise::new();
    let total = promises.len();
    if total == 0 {
        if n == 0 {
            result.resolve(Vec::new());
        } else {
            result.reject(Vec::new());
        }
        return result;
    }
    let state = Rc::new(RefCell::new(TallyState {
        values: Vec::new(),
        errors: Vec::new(),
    }));
    for promise in &promises {
        let state = state.clone();
        let settled = result.clone();
        let tally = move |outcome: Result<Rc<T>, Rc<E>>| {
            let verdict = {
                let mut state = state.borrow_mut();
                match outcome {
                    Ok(value) => state.values.push(value),
                    Err(error) => state.errors.push(error),
                }
                if state.values.len() + state.errors.len() == total {
                    Some(state.values.len() >= n)
                } else {
                    None
                }
            };
            match verdict {
                Some(true) => {
                    let values = std::mem::take(&mut state.borrow_mut().values);
                    settled.resolve(values);
                }
                Some(false) => {
                    let errors = std::mem::take(&mut state.borrow_mut().errors);
                    settled.reject(errors);
                }
                None => {}
            }
        };
        let tally_reject = tally.clone();
        promise.on_resolve_shared(move |value| tally(Ok(value)));
        promise.on_reject_shared(move |error| tally_reject(Err(error)));
    }
    result
}

/// Map each item through a promise-returning function and collect with
/// [`all`] semantics.
pub fn map_collect<I, T: 'static, E: 'static>(
    items: impl IntoIterator<Item = I>,
    f: impl FnMut(I) -> Promise<T, E>,
) -> Promise<Vec<Rc<T>>, E> {
    all(items.into_iter().map(f).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_resolves_in_input_order() {
        let first: Promise<u32, String> = Promise::new();
        let second: Promise<u32, String> = Promise::new();
        let joined = all(vec![first.clone(), second.clone()]);

        second.resolve(2);
        assert!(!joined.is_settled());
        first.resolve(1);

        let values = joined.value().unwrap();
        let values: Vec<u32> = values.iter().map(|v| **v).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_all_rejects_on_first_rejection() {
        let first: Promise<u32, String> = Promise::new();
        let second: Promise<u32, String> = Promise::new();
        let joined = all(vec![first.clone(), second.clone()]);

        second.reject("boom".to_string());

        assert!(joined.is_rejected());
        assert_eq!(
            joined.error().as_deref().map(String::as_str),
            Some("boom")
        );
        // Remaining settlements are absorbed without effect.
        first.resolve(1);
        assert!(joined.is_rejected());
    }

    #[test]
    fn test_all_of_nothing_resolves_immediately() {
        let joined: Promise<Vec<Rc<u32>>, String> = all(Vec::new());
        assert!(joined.is_resolved());
        assert!(joined.value().unwrap().is_empty());
    }

    #[test]
    fn test_some_takes_first_n_in_settlement_order() {
        let promises: Vec<Promise<u32, String>> = (0..3).map(|_| Promise::new()).collect();
        let joined = some(promises.clone(), 2);

        promises[2].resolve(30);
        promises[0].resolve(10);

        let values: Vec<u32> = joined.value().unwrap().iter().map(|v| **v).collect();
        assert_eq!(values, vec![30, 10]);
    }

    #[test]
    fn test_some_rejects_once_quota_is_impossible() {
        let promises: Vec<Promise<u32, String>> = (0..3).map(|_| Promise::new()).collect();
        let joined = some(promises.clone(), 3);

        promises[1].reject("out".to_string());

        assert!(joined.is_rejected());
        assert_eq!(joined.error().unwrap().len(), 1);
    }

    #[test]
    fn test_at_least_waits_for_every_settlement() {
        let promises: Vec<Promise<u32, String>> = (0..3).map(|_| Promise::new()).collect();
        let joined = at_least(promises.clone(), 2);

        promises[0].resolve(1);
        promises[1].reject("no".to_string());
        assert!(!joined.is_settled());

        promises[2].resolve(3);
        assert!(joined.is_resolved());
        assert_eq!(joined.value().unwrap().len(), 2);
    }

    #[test]
    fn test_at_least_rejects_below_quota() {
        let promises: Vec<Promise<u32, String>> = (0..2).map(|_| Promise::new()).collect();
        let joined = at_least(promises.clone(), 2);

        promises[0].reject("a".to_string());
        promises[1].resolve(1);

        assert!(joined.is_rejected());
        assert_eq!(joined.error().unwrap().len(), 1);
    }

    #[test]
    fn test_map_collect_runs_the_mapper_per_item() {
        let joined = map_collect(vec![1u32, 2, 3], |n| {
            Promise::<u32, String>::resolved(n * 10)
        });
        let values: Vec<u32> = joined.value().unwrap().iter().map(|v| **v).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }
}
