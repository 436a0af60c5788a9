//! Shutdown signalling and in-flight task tracking
//!
//! [`Shutdown`] is a broadcast-once signal backed by a `watch` channel: the
//! server owns the sending side and every loop, connection and handler holds
//! a [`ShutdownListener`]. Closing is idempotent and a listener created after
//! the close still observes it. Dropping the [`Shutdown`] also counts as
//! closed, so loops never outlive their server.
//!
//! [`Drain`] tracks spawned tasks: each task holds a [`TaskGuard`] and the
//! drain completes once the root guard has been released and every task
//! guard has been dropped.

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// Sending side of the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create an open signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Close the signal
    ///
    /// Returns `true` for the call that actually closed it and `false` for
    /// every later call.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Whether the signal has been closed
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a new receiving handle
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether shutdown has been requested (or the server is gone)
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is requested
    ///
    /// Resolves immediately if the signal is already closed. Cancel safe.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        // An error means the sender is gone, which is as good as closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Held by every tracked task; dropping it marks the task finished
#[derive(Debug, Clone)]
pub(crate) struct TaskGuard {
    _tx: mpsc::Sender<()>,
}

/// Waits for all tracked tasks to finish
#[derive(Debug)]
pub(crate) struct Drain {
    root: Mutex<Option<TaskGuard>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl Drain {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            root: Mutex::new(Some(TaskGuard { _tx: tx })),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// A guard for a new task, `None` once the drain has been closed
    pub(crate) fn guard(&self) -> Option<TaskGuard> {
        self.root.lock().clone()
    }

    /// Release the root guard so `wait` can complete
    pub(crate) fn close(&self) {
        self.root.lock().take();
    }

    /// Resolve once `close` was called and every task guard is dropped
    pub(crate) async fn wait(&self) {
        // Nothing is ever sent, recv only returns once all senders are gone.
        let _ = self.rx.lock().await.recv().await;
    }
}
