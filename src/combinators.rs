//! Promises built from other thenables.
//!
//! Both combinators subscribe to every input up front. Inputs may settle on
//! any thread, so their shared bookkeeping sits behind a lock or an atomic
//! flag, and only the first decisive outcome settles the combined promise.
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::promise::Promise;
use crate::resolution::Thenable;
use crate::scheduler::Scheduler;
use crate::Error;

struct Gather<T> {
    slots: Vec<Option<T>>,
    /// Zero once the outcome is decided.
    remaining: usize,
}

/// Fulfils with every input's value, in input order, once all of them are
/// fulfilled. Rejects with the first rejection.
///
/// An empty input fulfils with an empty `Vec` right away.
///
/// # Examples
///
/// ```
/// use promise_chain::{combinators, EventLoop, Promise};
/// use std::sync::Arc;
///
/// let event_loop = Arc::new(EventLoop::new());
/// let (a, resolve_a) = Promise::<u8, String>::pair(event_loop.clone());
/// let (b, resolve_b) = Promise::<u8, String>::pair(event_loop.clone());
/// let both = combinators::all(event_loop.clone(), vec![a, b]);
///
/// resolve_b.resolve(2).unwrap();
/// resolve_a.resolve(1).unwrap();
/// event_loop.run_until_idle();
/// assert_eq!(format!("{both:?}"), "Promise (fulfilled, value = [1, 2])");
/// ```
pub fn all<T, E, I>(scheduler: Arc<dyn Scheduler>, thenables: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator,
    I::Item: Thenable<T, E>,
{
    let thenables: Vec<_> = thenables.into_iter().collect();
    Promise::new(scheduler, move |resolver| {
        if thenables.is_empty() {
            report(resolver.resolve(Vec::new()));
            return Ok(());
        }
        let gather = Arc::new(Mutex::new(Gather {
            slots: thenables.iter().map(|_| None).collect(),
            remaining: thenables.len(),
        }));
        for (index, thenable) in thenables.into_iter().enumerate() {
            let on_value = {
                let gather = gather.clone();
                let resolver = resolver.clone();
                move |value: T| {
                    let finished = {
                        let mut gather = gather.lock().unwrap_or_else(PoisonError::into_inner);
                        if gather.remaining == 0 {
                            return;
                        }
                        gather.slots[index] = Some(value);
                        gather.remaining -= 1;
                        if gather.remaining > 0 {
                            return;
                        }
                        mem::take(&mut gather.slots)
                    };
                    report(resolver.resolve(finished.into_iter().flatten().collect()));
                }
            };
            let on_reason = {
                let gather = gather.clone();
                let resolver = resolver.clone();
                move |reason: E| {
                    if exhaust(&gather) {
                        report(resolver.reject(reason));
                    }
                }
            };
            if let Err(reason) = thenable.subscribe(Box::new(on_value), Box::new(on_reason)) {
                if exhaust(&gather) {
                    return Err(reason);
                }
                return Ok(());
            }
        }
        Ok(())
    })
}

/// Marks the gather as decided. Returns whether this call did it.
fn exhaust<T>(gather: &Mutex<Gather<T>>) -> bool {
    let mut gather = gather.lock().unwrap_or_else(PoisonError::into_inner);
    if gather.remaining == 0 {
        return false;
    }
    gather.remaining = 0;
    gather.slots.clear();
    true
}

/// Settles exactly like the first input to settle, fulfilled or rejected.
/// Later settlements are ignored. An empty input never settles.
pub fn race<T, E, I>(scheduler: Arc<dyn Scheduler>, thenables: I) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator,
    I::Item: Thenable<T, E>,
{
    let thenables: Vec<_> = thenables.into_iter().collect();
    Promise::new(scheduler, move |resolver| {
        let finished = Arc::new(AtomicBool::new(false));
        for thenable in thenables {
            let on_value = {
                let finished = finished.clone();
                let resolver = resolver.clone();
                move |value: T| {
                    if !finished.swap(true, Ordering::AcqRel) {
                        report(resolver.resolve(value));
                    }
                }
            };
            let on_reason = {
                let finished = finished.clone();
                let resolver = resolver.clone();
                move |reason: E| {
                    if !finished.swap(true, Ordering::AcqRel) {
                        report(resolver.reject(reason));
                    }
                }
            };
            if let Err(reason) = thenable.subscribe(Box::new(on_value), Box::new(on_reason)) {
                if !finished.swap(true, Ordering::AcqRel) {
                    return Err(reason);
                }
                return Ok(());
            }
        }
        Ok(())
    })
}

fn report(settled: Result<(), Error>) {
    if let Err(err) = settled {
        tracing::error!(error = %err, "combinator settled its promise twice");
    }
}
