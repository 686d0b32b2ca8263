use crate::scheduler::EventLoop;
use crate::Promise;
use std::sync::{Arc, Mutex};

/// Drives `event_loop` and reports how `promise` has settled, if it has.
pub(crate) fn outcome<T, E>(event_loop: &EventLoop, promise: &Promise<T, E>) -> Option<Result<T, E>>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    event_loop.run_until_idle();
    let slot = Arc::new(Mutex::new(None));
    let (on_value, on_reason) = (slot.clone(), slot.clone());
    promise.done(
        move |value| *on_value.lock().unwrap() = Some(Ok(value)),
        move |reason| *on_reason.lock().unwrap() = Some(Err(reason)),
    );
    event_loop.run_until_idle();
    let settled = slot.lock().unwrap().take();
    settled
}
