//! Reactions: what runs once a promise has settled.
use crate::resolution::{Resolution, Resolver};

/// Fulfilment callback of a [`Promise::register`](crate::Promise::register)
/// registration on a `Promise<T, E>`: takes the value `T` and produces the
/// resolution of the `Promise<R, E>` it returns, or `Err` to reject it.
pub type FulfillCallback<T, R, E> =
    Box<dyn FnOnce(T) -> Result<Resolution<R, E>, E> + Send + 'static>;

/// Rejection callback of a registration: takes the reason `E` and produces
/// the resolution of the returned `Promise<R, E>`. The input type is always
/// `E`, which is why there is no third parameter.
pub type RejectCallback<R, E> =
    Box<dyn FnOnce(E) -> Result<Resolution<R, E>, E> + Send + 'static>;

/// One queued registration on a cell. Fired exactly once with the settled
/// outcome, or dropped unfired if the cell never settles.
pub(crate) struct Reaction<T, E> {
    callback: Box<dyn FnOnce(Result<T, E>) + Send + 'static>,
}

impl<T, E> Reaction<T, E> {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        Reaction {
            callback: Box::new(callback),
        }
    }

    pub(crate) fn fire(self, outcome: Result<T, E>) {
        (self.callback)(outcome)
    }
}

/// The fulfilment side of a chained reaction.
pub(crate) enum Step<T, R, E> {
    /// No handler: pass the value through unchanged.
    Forward(fn(T) -> R),
    Call(FulfillCallback<T, R, E>),
}

/// Builds the reaction behind `then`: pick the callback matching the outcome,
/// run it, and settle `downstream` with what it produced. A missing rejection
/// handler forwards the reason.
pub(crate) fn chain<T, R, E>(
    on_fulfilled: Step<T, R, E>,
    on_rejected: Option<RejectCallback<R, E>>,
    downstream: Resolver<R, E>,
) -> Reaction<T, E>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Reaction::new(move |outcome: Result<T, E>| {
        let next = match outcome {
            Ok(value) => match on_fulfilled {
                Step::Forward(pass) => Ok(Resolution::Value(pass(value))),
                Step::Call(callback) => callback(value),
            },
            Err(reason) => match on_rejected {
                Some(callback) => callback(reason),
                None => Err(reason),
            },
        };
        let settled = match next {
            Ok(resolution) => downstream.settle(resolution),
            Err(fault) => downstream.reject(fault),
        };
        // The downstream capability is owned by this reaction alone, so the
        // only way to get here is a callback returning its own result promise.
        if let Err(err) = settled {
            tracing::error!(error = %err, "reaction could not settle its result promise");
            panic!("reaction could not settle its result promise: {err}");
        }
    })
}
