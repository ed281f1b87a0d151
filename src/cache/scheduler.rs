//! Deferred Task Scheduling
//!
//! Runs work after the caller has returned: either spawned onto the tokio
//! runtime, or queued until the host drains the queue at the end of a request.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

/// A unit of deferred work.
pub type Task = BoxFuture<'static, ()>;

// == Scheduler ==
pub trait Scheduler: Send + Sync {
    /// Hands `task` off to run later. Never runs it inline.
    fn defer(&self, task: Task);
}

// == Tokio Scheduler ==
/// Fire-and-forget: each task is spawned onto the current runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        tokio::spawn(task);
    }
}

// == Defer Queue ==
/// Holds tasks until [`DeferQueue::drain`] is called, typically from a
/// request-completion hook.
pub struct DeferQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
    pending: AtomicUsize,
}

impl DeferQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Runs queued tasks in order, including any they defer in turn.
    /// Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut ran = 0;
        while let Ok(task) = rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            task.await;
            ran += 1;
        }
        ran
    }
}

impl Default for DeferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for DeferQueue {
    fn defer(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
