use std::fmt;
use std::sync::Arc;

use crate::combinators;
use crate::promise::Promise;
use crate::resolution::{Resolver, Thenable};
use crate::scheduler::Scheduler;

/// Creates promises bound to one scheduler.
///
/// Wire an application's event loop, GUI dispatcher or worker thread in once
/// and build every promise through the factory.
#[derive(Clone)]
pub struct PromiseFactory {
    scheduler: Arc<dyn Scheduler>,
}

impl PromiseFactory {
    pub fn new<S>(scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        Self::with_shared(Arc::new(scheduler))
    }

    pub fn with_shared(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// See [`Promise::new`].
    pub fn promise<T, E, H>(&self, handler: H) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        H: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Promise::new(self.scheduler.clone(), handler)
    }

    /// Runs `handler` on `runner` instead of inline. A failing handler
    /// rejects the promise.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{PromiseFactory, WorkerThread};
    /// use futures::executor::block_on;
    /// use std::future::IntoFuture;
    ///
    /// let factory = PromiseFactory::new(WorkerThread::spawn().unwrap());
    /// let background = WorkerThread::builder().name("compute").spawn().unwrap();
    /// let sum = factory.promise_async(&background, |resolver| {
    ///     resolver.resolve((1..=10).sum::<u32>()).unwrap();
    ///     Ok::<_, String>(())
    /// });
    /// assert_eq!(block_on(sum.into_future()), Ok(Ok(55)));
    /// ```
    pub fn promise_async<T, E, H, S>(&self, runner: &S, handler: H) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        H: FnOnce(Resolver<T, E>) -> Result<(), E> + Send + 'static,
        S: Scheduler + ?Sized,
    {
        let (promise, resolver) = self.pair();
        runner.schedule(Box::new(move || {
            if let Err(reason) = handler(resolver.clone()) {
                if resolver.reject(reason).is_err() {
                    tracing::warn!("async promise handler failed after settling its promise; failure discarded");
                }
            }
        }));
        promise
    }

    /// See [`Promise::pair`].
    pub fn pair<T, E>(&self) -> (Promise<T, E>, Resolver<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        Promise::pair(self.scheduler.clone())
    }

    /// A promise already fulfilled with `value`.
    pub fn resolved<T, E>(&self, value: T) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let (promise, resolver) = self.pair();
        if resolver.resolve(value).is_err() {
            unreachable!("fresh promise already settled");
        }
        promise
    }

    /// A promise already rejected with `reason`.
    pub fn rejected<T, E>(&self, reason: E) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let (promise, resolver) = self.pair();
        if resolver.reject(reason).is_err() {
            unreachable!("fresh promise already settled");
        }
        promise
    }

    /// Wraps a foreign thenable in a promise that settles the same way.
    pub fn adopt<T, E, P>(&self, thenable: P) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        P: Thenable<T, E> + 'static,
    {
        let (promise, resolver) = self.pair();
        if resolver.adopt(thenable).is_err() {
            unreachable!("fresh promise already settled");
        }
        promise
    }

    /// See [`combinators::all`].
    pub fn all<T, E, I>(&self, thenables: I) -> Promise<Vec<T>, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        I: IntoIterator,
        I::Item: Thenable<T, E>,
    {
        combinators::all(self.scheduler.clone(), thenables)
    }

    /// See [`combinators::race`].
    pub fn race<T, E, I>(&self, thenables: I) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        I: IntoIterator,
        I::Item: Thenable<T, E>,
    {
        combinators::race(self.scheduler.clone(), thenables)
    }
}

impl fmt::Debug for PromiseFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::PromiseFactory;
    use crate::resolution::{OnFulfilled, OnRejected, Thenable};
    use crate::scheduler::EventLoop;
    use crate::testing::outcome;

    struct Later;

    impl Thenable<&'static str, String> for Later {
        fn subscribe(&self, ok: OnFulfilled<&'static str>, _: OnRejected<String>) -> Result<(), String> {
            std::thread::spawn(move || ok("from elsewhere")).join().unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_resolved_and_rejected() {
        let event_loop = EventLoop::new();
        let factory = PromiseFactory::new(event_loop.clone());
        let ok = factory.resolved::<i32, String>(1);
        let err = factory.rejected::<i32, String>("bad".into());
        assert_eq!(outcome(&event_loop, &ok), Some(Ok(1)));
        assert_eq!(outcome(&event_loop, &err), Some(Err("bad".into())));
    }

    #[test]
    fn test_adopt_foreign_thenable() {
        let event_loop = EventLoop::new();
        let factory = PromiseFactory::new(event_loop.clone());
        let adopted = factory.adopt(Later);
        assert_eq!(outcome(&event_loop, &adopted), Some(Ok("from elsewhere")));
    }

    #[test]
    fn test_promise_async_runs_on_runner() {
        let event_loop = EventLoop::new();
        let runner = EventLoop::new();
        let factory = PromiseFactory::new(event_loop.clone());
        let promise = factory.promise_async(&runner, |resolver| {
            resolver.resolve(5).unwrap();
            Ok::<_, String>(())
        });
        assert_eq!(outcome(&event_loop, &promise), None);
        assert_eq!(runner.run_until_idle(), 1);
        assert_eq!(outcome(&event_loop, &promise), Some(Ok(5)));
    }

    #[test]
    fn test_promise_async_failure_rejects() {
        let event_loop = EventLoop::new();
        let factory = PromiseFactory::new(event_loop.clone());
        let promise = factory.promise_async::<i32, String, _, _>(&event_loop, |_| Err("no".into()));
        assert_eq!(outcome(&event_loop, &promise), Some(Err("no".into())));
    }

    #[test]
    fn test_factory_combinators() {
        let event_loop = EventLoop::new();
        let factory = PromiseFactory::new(event_loop.clone());
        let both = factory.all(vec![
            factory.resolved::<i32, String>(1),
            factory.resolved(2),
        ]);
        let first = factory.race(vec![factory.pair::<i32, String>().0, factory.resolved(9)]);
        assert_eq!(outcome(&event_loop, &both), Some(Ok(vec![1, 2])));
        assert_eq!(outcome(&event_loop, &first), Some(Ok(9)));
    }
}
