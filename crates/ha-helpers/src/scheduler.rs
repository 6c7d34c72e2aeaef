//! Delayed callbacks

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Run `action` once after `delay`
///
/// The action runs on its own task once the delay elapses, so cancelling
/// the returned handle only prevents an action that has not started yet.
pub fn call_later<F, Fut>(delay: Duration, action: F) -> CancelHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tokio::spawn(action());
    });
    CancelHandle { task }
}

/// Handle to a callback scheduled with [`call_later`]
#[derive(Debug)]
pub struct CancelHandle {
    task: JoinHandle<()>,
}

impl CancelHandle {
    /// Cancel the callback if it has not fired yet; safe to call more than once
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the callback fired or was cancelled
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
