//! The "run this later" port every promise drains its reactions through.
//!
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a [`Task`] after the caller's stack has unwound.
///
/// Implementations must never run the task inline with `schedule`. Nothing
/// else is required: the task may run on any thread, and tasks handed over
/// by different promises may run in any relative order.
///
/// Any `Fn(Task)` closure is a scheduler, which makes it easy to bind to an
/// existing executor:
///
/// ```
/// use promise_chain::{Promise, Scheduler, Task};
/// use std::sync::Arc;
///
/// let scheduler: Arc<dyn Scheduler> = Arc::new(|task: Task| {
///     std::thread::spawn(task);
/// });
/// let (promise, resolver) = Promise::<u8, ()>::pair(scheduler);
/// resolver.resolve(7).unwrap();
/// # drop(promise);
/// ```
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

impl<F> Scheduler for F
where
    F: Fn(Task) + Send + Sync,
{
    fn schedule(&self, task: Task) {
        self(task)
    }
}

/// A cooperative, single-threaded task queue.
///
/// Scheduling only enqueues. The embedding application decides when queued
/// work runs by calling [`EventLoop::run_once`] or
/// [`EventLoop::run_until_idle`], typically from its main loop.
#[derive(Clone, Default)]
pub struct EventLoop {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest queued task. Returns `false` if there was none.
    pub fn run_once(&self) -> bool {
        // The lock is released before the task runs so it can schedule more.
        let task = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones scheduled meanwhile, until the queue is
    /// empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_idle(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Task) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").field("queued", &self.len()).finish()
    }
}
