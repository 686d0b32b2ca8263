//! Awaiting a promise from async Rust.
//!
//! Awaiting registers one more reaction on the promise; the reaction stores
//! the outcome and wakes the task. The promise still drains through its own
//! scheduler, so something has to run that scheduler while the task waits.
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::reaction::Reaction;
use crate::{Error, Promise};

/// The future returned by awaiting a [`Promise`].
///
/// Resolves to `Ok(outcome)` once the promise settles, or to
/// `Err(Error::Abandoned)` if the promise is dropped while still pending,
/// which happens once every handle and resolver for it is gone.
///
/// # Examples
///
/// ```
/// use promise_chain::{Error, Promise, WorkerThread};
/// use futures::executor::block_on;
/// use std::sync::Arc;
/// use std::thread;
///
/// let worker = Arc::new(WorkerThread::spawn().unwrap());
/// let (promise, resolver) = Promise::<String, ()>::pair(worker);
/// let task = thread::spawn(move || block_on(async { promise.await }));
/// resolver.resolve("🍓".into()).unwrap();
/// assert_eq!(task.join().unwrap(), Ok(Ok("🍓".to_string())));
///
/// let (orphan, resolver) = Promise::<String, ()>::pair(Arc::new(WorkerThread::spawn().unwrap()));
/// drop(resolver);
/// assert_eq!(block_on(async { orphan.await }), Err(Error::Abandoned));
/// ```
#[derive(Debug)]
pub struct Settled<T, E> {
    shared: Arc<Mutex<Inner<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Inner<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// The half moved into the reaction. If the reaction is dropped without
/// firing, the future is told the promise was abandoned.
struct Delivery<T, E> {
    shared: Option<Arc<Mutex<Inner<T, E>>>>,
}

impl<T, E> Delivery<T, E> {
    fn deliver(mut self, outcome: Result<T, E>) {
        if let Some(shared) = self.shared.take() {
            wake(&shared, Some(outcome));
        }
    }
}

impl<T, E> Drop for Delivery<T, E> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            wake(&shared, None);
        }
    }
}

fn wake<T, E>(shared: &Mutex<Inner<T, E>>, outcome: Option<Result<T, E>>) {
    let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
    inner.value = outcome;
    if let Ok(waker) = std::mem::replace(&mut inner.waker, Err(WakerState::Tainted)) {
        waker.wake()
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<Result<T, E>, Error>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        let shared = Arc::new(Mutex::new(Inner {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let delivery = Delivery {
            shared: Some(shared.clone()),
        };
        self.push_reaction(Reaction::new(move |outcome| delivery.deliver(outcome)));
        Settled { shared }
    }
}

impl<T, E> Future for Settled<T, E> {
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.value.take() {
            Some(outcome) => Poll::Ready(Ok(outcome)),
            None => match std::mem::replace(&mut inner.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => Poll::Ready(Err(Error::Abandoned)),
                _ => Poll::Pending,
            },
        }
    }
}
