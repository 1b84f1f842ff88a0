use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use log::trace;
use tokio::sync::oneshot;

use super::pool::ThreadPool;
use super::task::Task;
use crate::common::exception::IoError;

/// Posts `task` to `pool` and marks the owning request as blocked.
///
/// On rejection the task comes back untouched so the caller can reclaim its
/// buffers.
pub fn submit(
    pool: &ThreadPool,
    blocked: &Arc<AtomicUsize>,
    task: Box<Task>,
) -> Result<PendingTask, (IoError, Box<Task>)> {
    let (sender, receiver) = oneshot::channel();
    pool.post(task, sender)?;

    blocked.fetch_add(1, Ordering::AcqRel);
    trace!("task posted to \"{}\"", pool.name());

    Ok(PendingTask {
        receiver,
        blocked: Arc::clone(blocked),
    })
}

/// Completion of one submitted task.
///
/// Resolves exactly once with the task as the worker left it, or `None` if
/// the worker went away without running it. Dropping it unblocks the request
/// whether or not it resolved.
#[must_use = "a submitted task completes only when awaited"]
#[derive(Debug)]
pub struct PendingTask {
    receiver: oneshot::Receiver<Box<Task>>,
    blocked: Arc<AtomicUsize>,
}

impl Future for PendingTask {
    type Output = Option<Box<Task>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        self.blocked.fetch_sub(1, Ordering::AcqRel);
    }
}
