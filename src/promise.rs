use std::fmt;
use std::sync::Arc;

use crate::cell::{Cell, CellId};
use crate::reaction::{self, FulfillCallback, Reaction, RejectCallback, Step};
use crate::resolution::{OnFulfilled, OnRejected, Resolution, Resolver, Thenable};
use crate::scheduler::Scheduler;

/// A value that is not available yet.
///
/// A `Promise` is a cheap handle: clones refer to the same settlement cell.
/// It settles exactly once, through its [`Resolver`], and every reaction
/// registered on it runs later, through the promise's [`Scheduler`], in the
/// order the reactions were registered.
///
/// Registration never fails. Whatever goes wrong inside a callback settles
/// the returned promise as rejected instead.
///
/// # Examples
///
/// ```
/// use promise_chain::{EventLoop, Promise, Resolution};
/// use std::sync::Arc;
///
/// let event_loop = Arc::new(EventLoop::new());
/// let (promise, resolver) = Promise::<i32, String>::pair(event_loop.clone());
/// let parsed = promise
///     .and_then(|v| Ok(Resolution::Value(v.to_string())))
///     .map(|s| s.parse::<i64>().map_err(|e| e.to_string()));
///
/// resolver.resolve(12).unwrap();
/// event_loop.run_until_idle();
/// assert_eq!(format!("{parsed:?}"), "Promise (fulfilled, value = 12)");
/// ```
pub struct Promise<T, E> {
    cell: Arc<Cell<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn from_cell(cell: Arc<Cell<T, E>>) -> Self {
        Self { cell }
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// The scheduler this promise and everything chained from it drain on.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        self.cell.scheduler()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a promise and runs `handler` with its resolver right away.
    ///
    /// If `handler` returns `Err` before settling the promise, the promise is
    /// rejected with that reason. The handler may also keep the resolver and
    /// settle later, from any thread.
    pub fn new<H>(scheduler: Arc<dyn Scheduler>, handler: H) -> Self
    where
        H: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (promise, resolver) = Self::pair(scheduler);
        if let Err(reason) = handler(resolver.clone()) {
            if resolver.reject(reason).is_err() {
                tracing::warn!("promise handler failed after settling its promise; failure discarded");
            }
        }
        promise
    }

    /// A pending promise together with the capability that settles it.
    pub fn pair(scheduler: Arc<dyn Scheduler>) -> (Self, Resolver<T, E>) {
        let cell = Cell::new(scheduler);
        (Self::from_cell(cell.clone()), Resolver::new(cell))
    }

    /// The general registration: either callback may be absent, in which case
    /// the outcome passes through to the returned promise unchanged.
    pub fn register(
        &self,
        on_fulfilled: Option<FulfillCallback<T, T, E>>,
        on_rejected: Option<RejectCallback<T, E>>,
    ) -> Promise<T, E> {
        let step = match on_fulfilled {
            Some(callback) => Step::Call(callback),
            None => Step::Forward(std::convert::identity),
        };
        self.chain(step, on_rejected)
    }

    fn chain<R>(&self, step: Step<T, R, E>, on_rejected: Option<RejectCallback<R, E>>) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
    {
        let (next, resolver) = Promise::pair(self.scheduler().clone());
        self.cell.push_reaction(reaction::chain(step, on_rejected, resolver));
        next
    }

    /// Chains both outcomes. Each callback returns the resolution of the
    /// returned promise, or `Err` to reject it.
    pub fn then<R, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<R, E>, E> + Send + 'static,
        G: FnOnce(E) -> Result<Resolution<R, E>, E> + Send + 'static,
    {
        self.chain(Step::Call(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Chains the fulfilment only; a rejection passes through.
    pub fn and_then<R, F>(&self, on_fulfilled: F) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<R, E>, E> + Send + 'static,
    {
        self.chain(Step::Call(Box::new(on_fulfilled)), None)
    }

    /// Chains the rejection only; a value passes through.
    pub fn catch<G>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> Result<Resolution<T, E>, E> + Send + 'static,
    {
        self.register(None, Some(Box::new(on_rejected)))
    }

    /// Like [`and_then`](Self::and_then) for callbacks that produce a plain
    /// value.
    pub fn map<R, F>(&self, on_fulfilled: F) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Result<R, E> + Send + 'static,
    {
        self.and_then(move |value| on_fulfilled(value).map(Resolution::Value))
    }

    /// Like [`catch`](Self::catch) for callbacks that produce a plain value.
    pub fn recover<G>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.catch(move |reason| on_rejected(reason).map(Resolution::Value))
    }

    /// Runs a callback for either outcome; the returned promise is fulfilled
    /// with `()` unless the callback fails.
    pub fn then_accept<F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<(), E>
    where
        F: FnOnce(T) -> Result<(), E> + Send + 'static,
        G: FnOnce(E) -> Result<(), E> + Send + 'static,
    {
        self.then(
            move |value| on_fulfilled(value).map(Resolution::Value),
            move |reason| on_rejected(reason).map(Resolution::Value),
        )
    }

    /// [`then_accept`](Self::then_accept) without a rejection callback; a
    /// rejection passes through.
    pub fn accept<F>(&self, on_fulfilled: F) -> Promise<(), E>
    where
        F: FnOnce(T) -> Result<(), E> + Send + 'static,
    {
        self.map(on_fulfilled)
    }

    /// [`then_accept`](Self::then_accept) without a fulfilment callback. A
    /// value is dropped and the returned promise fulfils with `()`.
    pub fn catch_accept<G>(&self, on_rejected: G) -> Promise<(), E>
    where
        G: FnOnce(E) -> Result<(), E> + Send + 'static,
    {
        self.chain(
            Step::Forward(drop),
            Some(Box::new(move |reason| on_rejected(reason).map(Resolution::Value))),
        )
    }

    /// Ends a chain. Nothing further can be registered on the outcome.
    pub fn done<F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(T) + Send + 'static,
        G: FnOnce(E) + Send + 'static,
    {
        self.cell.push_reaction(Reaction::new(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        }));
    }

    /// Ends a chain on the value alone. A rejection is left unhandled and is
    /// reported as such once the chain is dropped.
    pub fn done_ok<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        drop(self.accept(move |value| {
            on_fulfilled(value);
            Ok(())
        }));
    }
}

impl<T, E> Promise<Promise<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Removes one layer of nesting.
    pub fn flatten(&self) -> Promise<T, E> {
        self.and_then(|inner| Ok(Resolution::from(inner)))
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>) -> Result<(), E> {
        self.done(on_fulfilled, on_rejected);
        Ok(())
    }

    fn cell_id(&self) -> Option<CellId> {
        Some(self.cell.id())
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn push_reaction(&self, reaction: Reaction<T, E>) {
        self.cell.push_reaction(reaction);
    }
}

/// Renders the current state for logs, e.g. `Promise (pending)` or
/// `Promise (rejected, reason = "boom")`. The format is not stable.
impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cell.fmt_state(f)
    }
}
