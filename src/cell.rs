//! The settlement cell: the mutable state behind one promise.
//!
//! All of `state`, the claim flag and the reaction queue live behind a single
//! mutex. User code never runs while that mutex is held: reactions are taken
//! out of the queue under the lock and fired after it is released.
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::reaction::Reaction;
use crate::scheduler::Scheduler;
use crate::Error;

/// Identity of a settlement cell, used to detect a promise being resolved
/// with itself.
///
/// Returned by [`Thenable::cell_id`](crate::Thenable::cell_id). Only values
/// produced by this crate's promises carry one; foreign thenables report
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(usize);

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    state: State<T, E>,
    /// Set once the resolver has been exercised, which may precede the state
    /// change when a thenable is being adopted.
    claimed: bool,
    reactions: VecDeque<Reaction<T, E>>,
    /// A drain is queued on the scheduler or currently running.
    drain_scheduled: bool,
    observed: bool,
}

impl<T, E> Inner<T, E> {
    fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending)
    }

    /// Marks a drain as scheduled if one is needed and none is in flight.
    fn request_drain(&mut self) -> bool {
        if self.is_pending() || self.reactions.is_empty() || self.drain_scheduled {
            return false;
        }
        self.drain_scheduled = true;
        true
    }
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if matches!(self.state, State::Rejected(_)) && !self.observed {
            tracing::warn!("rejected promise dropped without a rejection handler");
        }
    }
}

pub(crate) struct Cell<T, E> {
    inner: Mutex<Inner<T, E>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T, E> Cell<T, E> {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Cell {
            inner: Mutex::new(Inner {
                state: State::Pending,
                claimed: false,
                reactions: VecDeque::new(),
                drain_scheduled: false,
                observed: false,
            }),
            scheduler,
        })
    }

    pub(crate) fn id(self: &Arc<Self>) -> CellId {
        CellId(Arc::as_ptr(self) as *const () as usize)
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the single right to settle this cell.
    pub(crate) fn claim(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.claimed {
            return Err(Error::AlreadySettled);
        }
        inner.claimed = true;
        Ok(())
    }
}

impl<T, E> Cell<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Claims and settles in one step.
    pub(crate) fn settle(self: &Arc<Self>, outcome: Result<T, E>) -> Result<(), Error> {
        let schedule = {
            let mut inner = self.lock();
            if inner.claimed {
                return Err(Error::AlreadySettled);
            }
            inner.claimed = true;
            Self::write(&mut inner, outcome)
        };
        if schedule {
            self.schedule_drain();
        }
        Ok(())
    }

    /// Settles a cell whose claim was already taken, as adoption does when the
    /// adopted thenable reports back.
    pub(crate) fn complete(self: &Arc<Self>, outcome: Result<T, E>) {
        let schedule = {
            let mut inner = self.lock();
            debug_assert!(inner.claimed, "completing an unclaimed promise");
            if !inner.is_pending() {
                tracing::error!("ignoring second completion of a settled promise");
                return;
            }
            Self::write(&mut inner, outcome)
        };
        if schedule {
            self.schedule_drain();
        }
    }

    fn write(inner: &mut Inner<T, E>, outcome: Result<T, E>) -> bool {
        inner.state = match outcome {
            Ok(value) => State::Fulfilled(value),
            Err(reason) => State::Rejected(reason),
        };
        tracing::trace!(
            fulfilled = matches!(inner.state, State::Fulfilled(_)),
            reactions = inner.reactions.len(),
            "promise settled"
        );
        inner.request_drain()
    }

    /// Queues a reaction. If the cell has already settled a drain is
    /// scheduled for it; the reaction never runs inline.
    pub(crate) fn push_reaction(self: &Arc<Self>, reaction: Reaction<T, E>) {
        let schedule = {
            let mut inner = self.lock();
            inner.observed = true;
            inner.reactions.push_back(reaction);
            inner.request_drain()
        };
        if schedule {
            self.schedule_drain();
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let cell = Arc::clone(self);
        self.scheduler.schedule(Box::new(move || cell.drain()));
    }

    /// Fires every queued reaction in order. Reactions queued while this runs
    /// get a follow-up drain instead of running inline, and because the
    /// scheduled flag stays up until then, drains of one cell never overlap.
    fn drain(self: &Arc<Self>) {
        let (outcome, batch) = {
            let mut inner = self.lock();
            let outcome = match &inner.state {
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
                State::Pending => {
                    inner.drain_scheduled = false;
                    return;
                }
            };
            (outcome, mem::take(&mut inner.reactions))
        };
        tracing::trace!(reactions = batch.len(), "draining promise reactions");
        let mut pass = Pass { cell: self, batch };
        while let Some(reaction) = pass.batch.pop_front() {
            reaction.fire(outcome.clone());
        }
    }
}

/// One drain pass over a taken batch. Dropping it, also while unwinding from
/// a panicking reaction, hands unfired reactions back to the cell and either
/// lowers the scheduled flag or schedules the next pass.
struct Pass<'a, T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    cell: &'a Arc<Cell<T, E>>,
    batch: VecDeque<Reaction<T, E>>,
}

impl<T, E> Drop for Pass<'_, T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(
                unfired = self.batch.len(),
                "promise reaction panicked; rescheduling the rest of its batch"
            );
        }
        let reschedule = {
            let mut inner = self.cell.lock();
            // Unfired reactions were registered first, so they go back in front.
            while let Some(reaction) = self.batch.pop_back() {
                inner.reactions.push_front(reaction);
            }
            if inner.reactions.is_empty() {
                inner.drain_scheduled = false;
                false
            } else {
                true
            }
        };
        if reschedule {
            self.cell.schedule_drain();
        }
    }
}

impl<T, E> Cell<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    pub(crate) fn fmt_state(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lock().state {
            State::Pending => write!(f, "Promise (pending)"),
            State::Fulfilled(value) => write!(f, "Promise (fulfilled, value = {value:?})"),
            State::Rejected(reason) => write!(f, "Promise (rejected, reason = {reason:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cell;
    use crate::reaction::Reaction;
    use crate::scheduler::{EventLoop, Scheduler};
    use crate::{Error, WorkerThread};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    fn cell(event_loop: &EventLoop) -> Arc<Cell<i32, String>> {
        let scheduler: Arc<dyn Scheduler> = Arc::new(event_loop.clone());
        Cell::new(scheduler)
    }

    fn recorder(seen: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Reaction<i32, String> {
        let seen = seen.clone();
        Reaction::new(move |outcome: Result<i32, String>| {
            seen.lock().unwrap().push(format!("{tag}:{outcome:?}"))
        })
    }

    #[test]
    fn test_second_settlement_faults_and_keeps_first_value() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        assert_eq!(cell.settle(Ok(1)), Ok(()));
        assert_eq!(cell.settle(Ok(2)), Err(Error::AlreadySettled));
        assert_eq!(cell.settle(Err("late".into())), Err(Error::AlreadySettled));

        let seen = Arc::new(Mutex::new(Vec::new()));
        cell.push_reaction(recorder(&seen, "a"));
        event_loop.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec!["a:Ok(1)"]);
    }

    #[test]
    fn test_claim_blocks_later_settlement() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        cell.claim().unwrap();
        assert_eq!(cell.claim(), Err(Error::AlreadySettled));
        assert_eq!(cell.settle(Ok(3)), Err(Error::AlreadySettled));
        cell.complete(Ok(4));
        assert_eq!(format!("{}", DebugCell(&cell)), "Promise (fulfilled, value = 4)");
    }

    #[test]
    fn test_reactions_wait_for_the_scheduler() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        let seen = Arc::new(Mutex::new(Vec::new()));
        cell.push_reaction(recorder(&seen, "early"));
        assert!(event_loop.is_idle());

        cell.settle(Err("boom".into())).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(event_loop.len(), 1);

        event_loop.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec!["early:Err(\"boom\")"]);
    }

    #[test]
    fn test_fifo_across_settlement() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        let seen = Arc::new(Mutex::new(Vec::new()));
        cell.push_reaction(recorder(&seen, "r1"));
        cell.push_reaction(recorder(&seen, "r2"));
        cell.settle(Ok(7)).unwrap();
        cell.push_reaction(recorder(&seen, "r3"));
        // One drain covers everything queued before it runs.
        assert_eq!(event_loop.len(), 1);
        event_loop.run_until_idle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["r1:Ok(7)", "r2:Ok(7)", "r3:Ok(7)"]
        );
    }

    #[test]
    fn test_reaction_added_during_drain_runs_in_follow_up() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let nested_cell = cell.clone();
        let nested_seen = seen.clone();
        cell.push_reaction(Reaction::new(move |_| {
            nested_cell.push_reaction(recorder(&nested_seen, "nested"));
            nested_seen.lock().unwrap().push("first".into());
        }));
        cell.push_reaction(recorder(&seen, "second"));
        cell.settle(Ok(0)).unwrap();

        assert!(event_loop.run_once());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second:Ok(0)"]);
        assert_eq!(event_loop.len(), 1);
        event_loop.run_until_idle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first", "second:Ok(0)", "nested:Ok(0)"]
        );
    }

    #[test]
    fn test_panicking_reaction_keeps_the_queue_alive() {
        let event_loop = EventLoop::new();
        let cell = cell(&event_loop);
        let seen = Arc::new(Mutex::new(Vec::new()));
        cell.push_reaction(Reaction::new(|_| panic!("reaction failure")));
        cell.push_reaction(recorder(&seen, "sibling"));
        cell.settle(Ok(1)).unwrap();

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| event_loop.run_once()));
        assert!(unwound.is_err());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(event_loop.len(), 1);

        event_loop.run_until_idle();
        cell.push_reaction(recorder(&seen, "later"));
        event_loop.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec!["sibling:Ok(1)", "later:Ok(1)"]);
    }

    #[test]
    fn test_panicking_reaction_on_worker_thread() {
        let worker: Arc<dyn Scheduler> = Arc::new(WorkerThread::spawn().unwrap());
        let cell: Arc<Cell<i32, String>> = Cell::new(worker);
        let (sender, receiver) = mpsc::channel();
        cell.settle(Ok(2)).unwrap();

        let sibling = sender.clone();
        cell.push_reaction(Reaction::new(|_| panic!("reaction failure")));
        cell.push_reaction(Reaction::new(move |outcome| sibling.send(("sibling", outcome)).unwrap()));
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(5)),
            Ok(("sibling", Ok(2)))
        );

        cell.push_reaction(Reaction::new(move |outcome| sender.send(("later", outcome)).unwrap()));
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(5)),
            Ok(("later", Ok(2)))
        );
    }

    struct DebugCell<'a>(&'a Cell<i32, String>);

    impl std::fmt::Display for DebugCell<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt_state(f)
        }
    }
}
