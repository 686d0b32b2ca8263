//! A worker scheduler uses a multi-producer, single-consumer channel as its
//! backend. Tasks sent from any thread run one after another on a single
//! dedicated thread.
//!
use crate::scheduler::{Scheduler, Task};
use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::mpsc::{channel, Receiver, Sender},
    thread,
};

/// A [`Scheduler`] that owns one background thread.
///
/// The thread exits once every `WorkerThread` handle is gone and the queued
/// tasks have run. A task that panics is logged and the worker keeps going.
///
/// # Examples
///
/// ```
/// use promise_chain::{PromiseFactory, WorkerThread};
/// use futures::executor::block_on;
/// use std::future::IntoFuture;
///
/// let worker = WorkerThread::builder().name("promises").spawn().unwrap();
/// let factory = PromiseFactory::new(worker);
/// let doubled = factory.resolved::<u32, String>(21).map(|v| Ok(v * 2));
/// assert_eq!(block_on(doubled.into_future()), Ok(Ok(42)));
/// ```
#[derive(Debug)]
pub struct WorkerThread {
    sender: Sender<Task>,
    name: String,
}

#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    /// Names the worker thread. Defaults to `promise-worker`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn spawn(self) -> io::Result<WorkerThread> {
        let name = self.name.unwrap_or_else(|| "promise-worker".to_owned());
        let (tx, rx) = channel();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(rx))?;
        tracing::debug!(worker = %name, "spawned worker thread");
        Ok(WorkerThread { sender: tx, name })
    }
}

impl WorkerThread {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Spawns a worker with the default name.
    pub fn spawn() -> io::Result<Self> {
        Builder::default().spawn()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Scheduler for WorkerThread {
    fn schedule(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::error!(worker = %self.name, "worker thread has exited; dropping task");
        }
    }
}

fn run(receiver: Receiver<Task>) {
    for task in receiver {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("task panicked on worker thread");
        }
    }
    tracing::debug!("worker thread finished");
}

#[cfg(test)]
mod tests {
    use super::WorkerThread;
    use crate::scheduler::Scheduler;
    use std::sync::mpsc::channel;
    use std::thread;

    #[test]
    fn test_worker_runs_tasks_in_order_off_thread() {
        let worker = WorkerThread::builder().name("ordered").spawn().unwrap();
        assert_eq!(worker.name(), "ordered");
        let (tx, rx) = channel();
        let caller = thread::current().id();
        for i in 0..5 {
            let tx = tx.clone();
            worker.schedule(Box::new(move || {
                let on_caller = thread::current().id() == caller;
                tx.send((i, on_caller)).unwrap();
            }));
        }
        let seen: Vec<_> = rx.iter().take(5).collect();
        assert_eq!(seen, (0..5).map(|i| (i, false)).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let worker = WorkerThread::spawn().unwrap();
        let (tx, rx) = channel();
        worker.schedule(Box::new(|| panic!("task failure")));
        worker.schedule(Box::new(move || tx.send("still running").unwrap()));
        assert_eq!(rx.recv().unwrap(), "still running");
    }
}
