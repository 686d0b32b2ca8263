//! Deferred values that settle exactly once and run their reactions later.
//!
//! A [`Promise`] starts pending and is fulfilled with a value or rejected
//! with a reason through its [`Resolver`]. Reactions registered with
//! [`Promise::then`] and friends never run inline: every drain of a promise's
//! reaction queue goes through the [`Scheduler`] the promise was built with.
//!
//! ```
//! use promise_chain::{EventLoop, PromiseFactory};
//! use std::sync::{Arc, Mutex};
//!
//! let event_loop = EventLoop::new();
//! let factory = PromiseFactory::new(event_loop.clone());
//! let seen = Arc::new(Mutex::new(None));
//! let sink = seen.clone();
//!
//! factory
//!     .resolved::<i32, String>(42)
//!     .map(|v| Ok(v + 1))
//!     .done(move |v| *sink.lock().unwrap() = Some(v), |_| ());
//!
//! assert_eq!(*seen.lock().unwrap(), None);
//! event_loop.run_until_idle();
//! assert_eq!(*seen.lock().unwrap(), Some(43));
//! ```
//!
//! Beside the promise itself the crate root exports:
//!
//! - [`Resolver`], the capability that settles a promise, and
//!   [`Resolution`], what a callback hands to the next promise in a chain.
//! - [`Thenable`] for foreign promise-like values, with [`CellId`] identifying
//!   the promise behind a native thenable so a promise is never resolved with
//!   itself.
//! - [`FulfillCallback`] and [`RejectCallback`], the boxed callbacks taken by
//!   [`Promise::register`].
//! - [`Scheduler`] with the [`EventLoop`] and [`WorkerThread`] implementations,
//!   [`PromiseFactory`], the [`combinators`] and [`Settled`] for `.await`.
use thiserror::Error;

mod cell;
pub mod channel;
pub mod combinators;
pub mod factory;
pub mod future;
pub mod promise;
mod reaction;
pub mod resolution;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use cell::CellId;
pub use channel::WorkerThread;
pub use factory::PromiseFactory;
pub use future::Settled;
pub use promise::Promise;
pub use reaction::{FulfillCallback, RejectCallback};
pub use resolution::{OnFulfilled, OnRejected, Resolution, Resolver, Thenable};
pub use scheduler::{EventLoop, Scheduler, Task};

/// Faults raised by misuse of a settlement capability.
///
/// These are programmer errors. Failures of the computation itself travel
/// through the rejection channel of the promise instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("promise state already defined")]
    AlreadySettled,
    #[error("a promise cannot be resolved with itself")]
    SelfResolution,
    #[error("promise was dropped before it settled")]
    Abandoned,
}
