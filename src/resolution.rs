//! The resolution procedure: settling a promise directly with a value, or
//! letting it follow another thenable.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cell::{Cell, CellId};
use crate::promise::Promise;
use crate::Error;

/// Fulfilment callback handed to [`Thenable::subscribe`].
pub type OnFulfilled<T> = Box<dyn FnOnce(T) + Send + 'static>;
/// Rejection callback handed to [`Thenable::subscribe`].
pub type OnRejected<E> = Box<dyn FnOnce(E) + Send + 'static>;

/// Anything a promise can adopt: native [`Promise`]s, or adapters around
/// other deferred-value libraries.
///
/// Implementors should eventually call exactly one of the two callbacks.
/// When adopting, only the first call counts, so a misbehaving thenable
/// cannot settle a promise twice.
pub trait Thenable<T, E>: Send {
    /// Registers interest in the outcome. An `Err` means registration itself
    /// failed, which rejects the adopting promise with that reason.
    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>) -> Result<(), E>;

    /// The cell behind this thenable, if it is a native promise.
    fn cell_id(&self) -> Option<CellId> {
        None
    }
}

impl<T, E> Thenable<T, E> for Box<dyn Thenable<T, E>> {
    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>) -> Result<(), E> {
        (**self).subscribe(on_fulfilled, on_rejected)
    }

    fn cell_id(&self) -> Option<CellId> {
        (**self).cell_id()
    }
}

/// What a promise is resolved with.
pub enum Resolution<T, E> {
    /// Fulfil with this value.
    Value(T),
    /// Follow this thenable and settle the same way it does.
    Adopt(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn adopt<P>(thenable: P) -> Self
    where
        P: Thenable<T, E> + 'static,
    {
        Resolution::Adopt(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::adopt(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Adopt(thenable) => f
                .debug_tuple("Adopt")
                .field(&thenable.cell_id())
                .finish(),
        }
    }
}

/// The settlement capability of one promise.
///
/// Clones share the same single right to settle: whichever of `resolve`,
/// `reject`, `adopt` or `settle` succeeds first wins, and every later call on
/// any clone returns [`Error::AlreadySettled`].
pub struct Resolver<T, E> {
    cell: Arc<Cell<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(cell: Arc<Cell<T, E>>) -> Self {
        Self { cell }
    }

    /// Fulfils the promise with `value`.
    #[must_use = "a settlement fault means the promise was already settled"]
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.cell.settle(Ok(value))
    }

    /// Rejects the promise with `reason`.
    #[must_use = "a settlement fault means the promise was already settled"]
    pub fn reject(&self, reason: E) -> Result<(), Error> {
        self.cell.settle(Err(reason))
    }

    /// Makes the promise follow `thenable`. The capability counts as used
    /// from here on even though the promise stays pending until `thenable`
    /// settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{EventLoop, Error, Promise};
    /// use std::sync::Arc;
    ///
    /// let event_loop = Arc::new(EventLoop::new());
    /// let (promise, resolver) = Promise::<u8, ()>::pair(event_loop.clone());
    /// assert_eq!(resolver.adopt(promise.clone()), Err(Error::SelfResolution));
    ///
    /// let (source, source_resolver) = Promise::<u8, ()>::pair(event_loop.clone());
    /// resolver.adopt(source).unwrap();
    /// assert_eq!(resolver.resolve(1), Err(Error::AlreadySettled));
    /// source_resolver.resolve(2).unwrap();
    /// event_loop.run_until_idle();
    /// assert_eq!(format!("{promise:?}"), "Promise (fulfilled, value = 2)");
    /// ```
    #[must_use = "a settlement fault means the promise was already settled"]
    pub fn adopt<P>(&self, thenable: P) -> Result<(), Error>
    where
        P: Thenable<T, E> + 'static,
    {
        self.settle(Resolution::adopt(thenable))
    }

    /// Runs the resolution procedure for `resolution`.
    #[must_use = "a settlement fault means the promise was already settled"]
    pub fn settle(&self, resolution: Resolution<T, E>) -> Result<(), Error> {
        match resolution {
            Resolution::Value(value) => self.resolve(value),
            Resolution::Adopt(thenable) => {
                if thenable.cell_id() == Some(self.cell.id()) {
                    return Err(Error::SelfResolution);
                }
                self.cell.claim()?;
                follow(&self.cell, thenable);
                Ok(())
            }
        }
    }

    /// The promise this capability settles.
    pub fn promise(&self) -> Promise<T, E> {
        Promise::from_cell(self.cell.clone())
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

/// Subscribes `cell` to `thenable`. The cell's claim must already be held.
fn follow<T, E>(cell: &Arc<Cell<T, E>>, thenable: Box<dyn Thenable<T, E>>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    tracing::debug!(native = thenable.cell_id().is_some(), "adopting thenable");
    let called = Arc::new(AtomicBool::new(false));
    let on_fulfilled: OnFulfilled<T> = {
        let cell = cell.clone();
        let called = called.clone();
        Box::new(move |value| {
            if !called.swap(true, Ordering::AcqRel) {
                cell.complete(Ok(value));
            }
        })
    };
    let on_rejected: OnRejected<E> = {
        let cell = cell.clone();
        let called = called.clone();
        Box::new(move |reason| {
            if !called.swap(true, Ordering::AcqRel) {
                cell.complete(Err(reason));
            }
        })
    };
    if let Err(reason) = thenable.subscribe(on_fulfilled, on_rejected) {
        if !called.swap(true, Ordering::AcqRel) {
            cell.complete(Err(reason));
        }
    }
}
