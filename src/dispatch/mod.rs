//! Cross-thread task dispatch
//!
//! Protocol threads never touch compositor state directly: every
//! protocol-initiated window operation is packaged as a typed [`Task`],
//! pushed onto the owning session's FIFO queue, and signaled to the
//! compositor thread through a wakeup channel. The compositor thread drains
//! whole batches per wakeup; a task that re-dispatches lands in the next
//! wakeup cycle, so drain progress can't be starved.
//!
//! Teardown is the cancellation mechanism: the session is marked dead, and
//! `drain_free_only` resolves every still-queued task in *free-only* mode
//! (cleanup and negative-acknowledge only, no compositor state touched).
//! Every enqueued task completes in exactly one of {run, free-only}.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};
use crate::layout::{MonitorDescriptor, OutputId, Rect};
use crate::session::SessionId;
use crate::window::SeatId;

/// How a dequeued task must be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Execute normally against live compositor state.
    Run,
    /// Session is tearing down: release what the task owns, acknowledge
    /// nothing, touch no compositor state.
    FreeOnly,
}

/// A window operation requested by the remote peer. Rects are client-space;
/// the compositor thread transforms them against the layout active at
/// execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // variant names are the documentation
pub enum WindowOp {
    Move { rect: Rect },
    Snap { rect: Rect },
    Minimize,
    Maximize,
    Restore,
    Activate { seat: SeatId },
    Close,
    SetOutput { output: OutputId },
    SetFullscreen { fullscreen: bool },
}

/// Typed payload of a deferred task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOp {
    /// Operate on the window bound to `window_id` in the session's table.
    Window { window_id: u32, op: WindowOp },
    /// Validate and publish a new monitor topology.
    SetLayout { monitors: Vec<MonitorDescriptor> },
    /// Expose every already-mapped window to the session (initial sync
    /// after connect).
    SyncWindows,
}

/// One deferred unit of work, FIFO-ordered within its session.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Session that enqueued the task.
    pub session: SessionId,
    /// What to do.
    pub op: TaskOp,
    /// Layout version the protocol thread saw at enqueue time; when it no
    /// longer matches, the executor re-validates against the current
    /// layout instead of applying stale coordinates.
    pub layout_version: Option<u64>,
}

/// Per-session FIFO task queue, shared between the protocol thread
/// (producer) and the compositor thread (consumer).
#[derive(Debug, Default)]
pub struct SessionQueue {
    tasks: Mutex<VecDeque<Task>>,
    dead: AtomicBool,
}

impl SessionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session has been marked dead.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Mark the session dead. Subsequent dispatches fail and any drained
    /// task completes free-only.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Returns false when the session died before the push landed. The
    /// dead check happens under the queue lock, so a push can never slip
    /// in behind a teardown drain and strand a task.
    fn push(&self, task: Task) -> bool {
        let mut tasks = self.tasks.lock();
        if self.is_dead() {
            return false;
        }
        tasks.push_back(task);
        true
    }

    /// Whether any tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Put a deferred task back without signaling a wakeup; it runs when
    /// the next wakeup or repaint tick drains the queue. Dropped silently
    /// if the session died in the meantime.
    pub fn requeue(&self, task: Task) {
        if !self.push(task) {
            trace!("requeue on dead session dropped");
        }
    }

    /// Take the whole current batch in enqueue order. Tasks enqueued during
    /// execution of the batch wait for the next wakeup.
    pub fn take_batch(&self) -> VecDeque<Task> {
        std::mem::take(&mut *self.tasks.lock())
    }

    /// Teardown drain: mark dead and take everything still queued. Runs
    /// once, after which the queue stays empty. The caller completes each
    /// returned task in free-only mode.
    pub fn drain_free_only(&self) -> Vec<Task> {
        let mut tasks = self.tasks.lock();
        self.mark_dead();
        let drained: Vec<_> = tasks.drain(..).collect();
        drop(tasks);
        if !drained.is_empty() {
            debug!(count = drained.len(), "draining queued tasks free-only");
        }
        drained
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

/// Wakeup messages observed by the compositor thread's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A session enqueued work.
    Session(SessionId),
    /// A session's peer disconnected; run teardown on the compositor
    /// thread.
    SessionClosed(SessionId),
    /// Stop the loop (process shutdown).
    Shutdown,
}

/// Clonable producer half of the dispatch path. One per protocol thread.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    wake_tx: mpsc::Sender<Wakeup>,
}

impl Dispatcher {
    /// Create the dispatcher and the wakeup receiver the compositor loop
    /// owns.
    pub fn new() -> (Self, mpsc::Receiver<Wakeup>) {
        let (wake_tx, wake_rx) = mpsc::channel();
        (Self { wake_tx }, wake_rx)
    }

    /// Enqueue `task` on `queue` and signal the compositor loop. Never
    /// blocks. Fails with `DispatchUnavailable` when the session is dead or
    /// the compositor loop is gone; callers on the session bootstrap path
    /// treat that as fatal.
    pub fn dispatch(&self, queue: &SessionQueue, task: Task) -> Result<()> {
        let session = task.session;
        if !queue.push(task) {
            return Err(BridgeError::DispatchUnavailable {
                reason: "session is tearing down",
            });
        }
        self.wake_tx
            .send(Wakeup::Session(session))
            .map_err(|_| BridgeError::DispatchUnavailable {
                reason: "compositor loop has shut down",
            })?;
        trace!(?session, "task dispatched");
        Ok(())
    }

    /// Hand session teardown to the compositor loop. Best-effort: if the
    /// loop is already gone, there is no state left to tear down.
    pub fn signal_session_closed(&self, session: SessionId) {
        let _ = self.wake_tx.send(Wakeup::SessionClosed(session));
    }

    /// Ask the compositor loop to exit.
    pub fn shutdown(&self) {
        let _ = self.wake_tx.send(Wakeup::Shutdown);
    }
}
