//! Session bridge context and compositor loop
//!
//! `Bridge` is the explicit context object rooting all shared state: the
//! session map, the active monitor layout, the notification registry, and
//! the window synchronizer. It lives on the compositor thread and drains
//! the dispatch queues; [`BridgeHandle`] is the clonable face handed to
//! protocol threads, which can only register sessions and enqueue tasks.
//!
//! # Threading
//!
//! ```text
//! Protocol thread (per session)          Compositor thread (single)
//!   BridgeHandle::dispatch_window_op ──▶ SessionQueue ──▶ Bridge::step
//!   BridgeHandle::close_session      ──▶ Wakeup       ──▶   execute / teardown
//!                                                          WindowManager
//!                                                          ActiveLayout
//!                                             Notifier ◀── transitions
//! ```
//!
//! The synchronizer and transform are reachable only from `Bridge` methods,
//! which the compositor thread owns exclusively.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{Completion, Dispatcher, Task, TaskOp, Wakeup, WindowOp};
use crate::error::{BridgeError, Result};
use crate::layout::{ActiveLayout, MonitorLayout, OutputId, Rect};
use crate::notify::{BridgeEvent, EventStream, Notifier, WindowEvent};
use crate::session::{Session, SessionId, SessionLimits};
use crate::window::{
    OpOrigin, Transition, TransitionKind, WindowHandle, WindowManager,
};

/// State shared between the compositor thread and protocol threads. Only
/// thread-safe pieces live here; the synchronizer stays with [`Bridge`].
pub struct BridgeShared {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_session: AtomicU32,
    layout: ActiveLayout,
    notifier: Notifier,
    limits: SessionLimits,
}

impl BridgeShared {
    fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Live sessions, for per-session event fan-out.
    fn live_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }
}

/// Clonable cross-thread face of the bridge. Safe to use from any thread.
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<BridgeShared>,
    dispatcher: Dispatcher,
}

impl BridgeHandle {
    /// Register a new peer session and queue the initial window sync so the
    /// peer learns about already-mapped windows. `DispatchUnavailable` here
    /// is fatal to session setup.
    pub fn create_session(&self) -> Result<Arc<Session>> {
        let id = SessionId(self.shared.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(id, self.shared.limits)?;
        self.shared.sessions.lock().insert(id, Arc::clone(&session));

        let sync = Task {
            session: id,
            op: TaskOp::SyncWindows,
            layout_version: None,
        };
        if let Err(err) = self.dispatcher.dispatch(session.queue(), sync) {
            self.shared.sessions.lock().remove(&id);
            return Err(err);
        }
        Ok(session)
    }

    /// Enqueue a window operation for the compositor thread. The current
    /// layout version is captured so stale coordinates get re-validated.
    pub fn dispatch_window_op(
        &self,
        session: &Session,
        window_id: u32,
        op: WindowOp,
    ) -> Result<()> {
        let task = Task {
            session: session.id(),
            op: TaskOp::Window { window_id, op },
            layout_version: self.shared.layout.current().map(|l| l.version()),
        };
        self.dispatcher.dispatch(session.queue(), task)
    }

    /// Enqueue a monitor topology change reported by the peer.
    pub fn dispatch_set_layout(
        &self,
        session: &Session,
        monitors: Vec<crate::layout::MonitorDescriptor>,
    ) -> Result<()> {
        let task = Task {
            session: session.id(),
            op: TaskOp::SetLayout { monitors },
            layout_version: None,
        };
        self.dispatcher.dispatch(session.queue(), task)
    }

    /// Signal peer disconnect. Teardown itself runs on the compositor
    /// thread: mark dead, complete queued tasks free-only, detach windows.
    pub fn close_session(&self, session: &Session) {
        session.queue().mark_dead();
        self.dispatcher.signal_session_closed(session.id());
    }

    /// Subscribe to bridge events on the given side.
    pub fn subscribe(&self, side: OpOrigin) -> EventStream {
        self.shared.notifier.subscribe(side)
    }

    /// End a subscription.
    pub fn unsubscribe(&self, id: u64) {
        self.shared.notifier.unsubscribe(id)
    }

    /// The active monitor layout, if one has been published.
    pub fn current_layout(&self) -> Option<Arc<MonitorLayout>> {
        self.shared.layout.current()
    }

    /// Ask the compositor loop to exit.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

/// The compositor-thread half: the synchronizer plus the drain loop.
pub struct Bridge {
    shared: Arc<BridgeShared>,
    manager: WindowManager,
    wake_rx: Receiver<Wakeup>,
    repaint_interval: Duration,
    /// Thread running the loop, pinned on the first step. Debug guard
    /// against the synchronizer being driven from two threads.
    loop_thread: Option<std::thread::ThreadId>,
    zorder_sync: bool,
}

impl Bridge {
    /// Build the bridge from config. Returns the compositor-thread half and
    /// the clonable handle for protocol threads.
    pub fn new(config: &Config) -> (Self, BridgeHandle) {
        let (dispatcher, wake_rx) = Dispatcher::new();
        let shared = Arc::new(BridgeShared {
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU32::new(1),
            layout: ActiveLayout::new(),
            notifier: Notifier::new(),
            limits: config.session_limits(),
        });
        let bridge = Self {
            shared: Arc::clone(&shared),
            manager: WindowManager::new(Duration::from_secs(config.bridge.closing_timeout_secs)),
            wake_rx,
            repaint_interval: Duration::from_millis(config.bridge.repaint_interval_ms),
            zorder_sync: config.bridge.zorder_sync,
            loop_thread: None,
        };
        let handle = BridgeHandle { shared, dispatcher };
        (bridge, handle)
    }

    /// Run the compositor loop until shutdown.
    pub fn run(mut self) {
        info!("session bridge loop started");
        while self.step() {}
        info!("session bridge loop stopped");
    }

    /// One loop iteration: wait for a wakeup (or the repaint interval),
    /// drain, and tick. Returns false when the loop should exit.
    pub fn step(&mut self) -> bool {
        let current = std::thread::current().id();
        debug_assert_eq!(
            *self.loop_thread.get_or_insert(current),
            current,
            "bridge loop stepped from a second thread"
        );
        match self.wake_rx.recv_timeout(self.repaint_interval) {
            Ok(Wakeup::Session(id)) => {
                self.drain_session(id);
                true
            }
            Ok(Wakeup::SessionClosed(id)) => {
                self.teardown_session(id);
                true
            }
            Ok(Wakeup::Shutdown) => false,
            Err(RecvTimeoutError::Timeout) => {
                self.repaint_tick();
                true
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Drain one session's current batch. Tasks enqueued while the batch
    /// executes land in the next wakeup cycle.
    fn drain_session(&mut self, id: SessionId) {
        let Some(session) = self.shared.session(id) else {
            return;
        };
        let batch = session.queue().take_batch();
        for task in batch {
            let completion = if session.queue().is_dead() {
                Completion::FreeOnly
            } else {
                Completion::Run
            };
            self.execute(&session, task, completion);
        }
    }

    /// Teardown on the compositor thread: resolve queued tasks free-only,
    /// then detach (never destroy) the windows the peer could see.
    fn teardown_session(&mut self, id: SessionId) {
        let Some(session) = self.shared.sessions.lock().remove(&id) else {
            return;
        };
        for task in session.begin_teardown() {
            self.execute(&session, task, Completion::FreeOnly);
        }
        let detached = session.detach_all_windows();
        debug!(session = %id, windows = detached.len(), "session torn down");
    }

    fn execute(&mut self, session: &Arc<Session>, task: Task, completion: Completion) {
        if completion == Completion::FreeOnly {
            // Cleanup half only: the payload owns no external resources
            // beyond its allocation, and the peer is gone, so there is
            // nobody left to acknowledge.
            debug!(session = %session.id(), op = ?task.op, "task resolved free-only");
            return;
        }
        match task.op {
            TaskOp::Window { window_id, ref op } => {
                self.execute_window_op(session, &task, window_id, op.clone());
            }
            TaskOp::SetLayout { ref monitors } => {
                match self.shared.layout.publish(monitors) {
                    Ok(layout) => {
                        self.shared.notifier.publish(
                            &BridgeEvent::LayoutAccepted {
                                session: session.id(),
                                version: layout.version(),
                            },
                            None,
                        );
                    }
                    Err(err) => {
                        warn!(session = %session.id(), %err, "monitor layout rejected");
                        self.nack(session.id(), None, &err);
                    }
                }
            }
            TaskOp::SyncWindows => self.sync_windows(session),
        }
    }

    fn execute_window_op(
        &mut self,
        session: &Arc<Session>,
        task: &Task,
        window_id: u32,
        op: WindowOp,
    ) {
        let Some(handle) = session.resolve_window(window_id) else {
            let err = BridgeError::NotFound {
                table: "window",
                id: window_id,
            };
            warn!(session = %session.id(), %err, "window op on unbound ID");
            self.nack(session.id(), Some(window_id), &err);
            return;
        };

        let layout = self.shared.layout.current();
        if needs_layout(&op) && layout.is_none() {
            // Layout still negotiating: requeue instead of blocking. No
            // wakeup is sent, so the retry rides the next drain or repaint
            // tick instead of spinning the loop.
            debug!(session = %session.id(), "layout not ready; deferring window op");
            session.queue().requeue(task.clone());
            return;
        }
        if let (Some(enqueued), Some(current)) = (task.layout_version, layout.as_deref()) {
            if enqueued != current.version() {
                debug!(
                    session = %session.id(),
                    enqueued,
                    current = current.version(),
                    "re-validating request against newer layout"
                );
            }
        }

        let result = match op {
            WindowOp::Move { rect } => {
                let local = to_local(&layout, rect);
                self.manager.move_window(handle, local, OpOrigin::Remote)
            }
            WindowOp::Snap { rect } => {
                let local = to_local(&layout, rect);
                self.manager.snap(handle, local, OpOrigin::Remote)
            }
            WindowOp::Minimize => self.manager.minimize(handle, OpOrigin::Remote),
            WindowOp::Maximize => {
                let workarea = self.workarea_for(handle, layout.as_deref());
                match workarea {
                    Ok(area) => self.manager.maximize(handle, area, OpOrigin::Remote),
                    Err(err) => Err(err),
                }
            }
            WindowOp::Restore => self.manager.restore(handle, OpOrigin::Remote),
            WindowOp::Activate { seat } => self.manager.activate(handle, seat, OpOrigin::Remote),
            WindowOp::Close => self.manager.close(handle, OpOrigin::Remote),
            WindowOp::SetOutput { output } => check_output(layout.as_deref(), output)
                .and_then(|()| self.manager.set_output(handle, output, OpOrigin::Remote)),
            WindowOp::SetFullscreen { fullscreen } => {
                self.manager.set_fullscreen(handle, fullscreen, OpOrigin::Remote)
            }
        };

        match result {
            Ok(transition) => self.publish_transition(&transition),
            Err(err) => {
                debug!(session = %session.id(), window_id, %err, "window op rejected");
                self.nack(session.id(), Some(window_id), &err);
            }
        }
    }

    /// Expose every already-mapped window to a fresh session, mirroring the
    /// peer-activation window-status sync.
    fn sync_windows(&mut self, session: &Arc<Session>) {
        let mapped = self.manager.mapped_windows();
        for handle in mapped {
            self.expose_to_session(session, handle);
        }
    }

    fn expose_to_session(&mut self, session: &Arc<Session>, handle: WindowHandle) {
        let Ok(window) = self.manager.window(handle) else {
            return;
        };
        let geometry = window.geometry;
        let flags = window.flags();
        match session.expose_window(handle) {
            Ok(window_id) => {
                let event = BridgeEvent::Window(WindowEvent {
                    session: session.id(),
                    window_id,
                    kind: TransitionKind::Mapped,
                    geometry: self.to_remote(geometry),
                    flags,
                });
                self.shared.notifier.publish(&event, Some(OpOrigin::Local));
            }
            Err(err) => {
                // Exhaustion is recoverable resource pressure, not fatal.
                warn!(session = %session.id(), %err, "cannot expose window");
            }
        }
    }

    // === Shell-side entry points (compositor thread only) ===

    /// Shell callback: a new shell surface appeared.
    pub fn handle_window_created(
        &mut self,
        title: String,
        geometry: Rect,
        output: OutputId,
        parent: Option<WindowHandle>,
    ) -> Result<WindowHandle> {
        self.manager.create(title, geometry, output, parent)
    }

    /// Shell callback: first commit maps the window and exposes it to every
    /// live session.
    pub fn handle_window_committed(&mut self, handle: WindowHandle) -> Result<()> {
        if let Some(transition) = self.manager.commit(handle)? {
            for session in self.shared.live_sessions() {
                if !session.is_dead() {
                    self.expose_to_session(&session, transition.handle);
                }
            }
        }
        Ok(())
    }

    /// Shell callback: the surface is gone. Detaches its protocol IDs and
    /// invalidates the handle.
    pub fn handle_window_destroyed(&mut self, handle: WindowHandle) -> Result<()> {
        let transition = self.manager.destroy(handle)?;
        for session in self.shared.live_sessions() {
            if let Some(window_id) = session_window_id(&session, handle) {
                session.detach_window(window_id);
                let event = BridgeEvent::Window(WindowEvent {
                    session: session.id(),
                    window_id,
                    kind: TransitionKind::Destroyed,
                    geometry: self.to_remote(transition.geometry),
                    flags: transition.flags,
                });
                self.shared.notifier.publish(&event, Some(OpOrigin::Local));
            }
        }
        Ok(())
    }

    /// Shell callback: local geometry change (move/resize from the
    /// compositor side).
    pub fn handle_geometry_changed(&mut self, handle: WindowHandle, geometry: Rect) -> Result<()> {
        let t = self.manager.move_window(handle, geometry, OpOrigin::Local)?;
        self.publish_transition(&t);
        Ok(())
    }

    /// Shell callback: the compositor made the window fullscreen (or undid
    /// it).
    pub fn handle_fullscreen_changed(&mut self, handle: WindowHandle, fullscreen: bool) -> Result<()> {
        let t = self.manager.set_fullscreen(handle, fullscreen, OpOrigin::Local)?;
        self.publish_transition(&t);
        Ok(())
    }

    /// Local shell policy operations (keybindings, taskbar) funnel through
    /// here with a `Local` origin so the remote side hears about them.
    pub fn apply_local_op(&mut self, handle: WindowHandle, op: WindowOp) -> Result<()> {
        // Shell-side rects are already compositor-space.
        let t = match op {
            WindowOp::Move { rect } => self.manager.move_window(handle, rect, OpOrigin::Local),
            WindowOp::Snap { rect } => self.manager.snap(handle, rect, OpOrigin::Local),
            WindowOp::Minimize => self.manager.minimize(handle, OpOrigin::Local),
            WindowOp::Maximize => {
                let layout = self.shared.layout.current();
                let workarea = self.workarea_for(handle, layout.as_deref())?;
                self.manager.maximize(handle, workarea, OpOrigin::Local)
            }
            WindowOp::Restore => self.manager.restore(handle, OpOrigin::Local),
            WindowOp::Activate { seat } => self.manager.activate(handle, seat, OpOrigin::Local),
            WindowOp::Close => self.manager.close(handle, OpOrigin::Local),
            WindowOp::SetOutput { output } => {
                let layout = self.shared.layout.current();
                check_output(layout.as_deref(), output)
                    .and_then(|()| self.manager.set_output(handle, output, OpOrigin::Local))
            }
            WindowOp::SetFullscreen { fullscreen } => {
                self.manager.set_fullscreen(handle, fullscreen, OpOrigin::Local)
            }
        }?;
        self.publish_transition(&t);
        Ok(())
    }

    /// Read access for repaint/hit-testing queries from the shell.
    pub fn window_manager(&self) -> &WindowManager {
        &self.manager
    }

    /// Repaint-cycle tick: retry deferred tasks, flush the coalesced
    /// z-order update, and surface unresponsive close requests.
    fn repaint_tick(&mut self) {
        for session in self.shared.live_sessions() {
            if !session.queue().is_empty() {
                self.drain_session(session.id());
            }
        }
        if let Some(order) = self.manager.flush_zorder() {
            if self.zorder_sync {
                for session in self.shared.live_sessions() {
                    let window_ids: Vec<u32> = order
                        .iter()
                        .filter_map(|h| session_window_id(&session, *h))
                        .collect();
                    if !window_ids.is_empty() {
                        self.shared.notifier.publish(
                            &BridgeEvent::ZOrder {
                                session: session.id(),
                                window_ids,
                            },
                            Some(OpOrigin::Local),
                        );
                    }
                }
            }
        }
        for t in self.manager.scan_closing(Instant::now()) {
            // Warning toward the owning shell; the window is never forced.
            self.publish_transition(&t);
        }
    }

    fn publish_transition(&self, transition: &Transition) {
        let remote_geometry = self.to_remote(transition.geometry);
        for session in self.shared.live_sessions() {
            if let Some(window_id) = session_window_id(&session, transition.handle) {
                let event = BridgeEvent::Window(WindowEvent {
                    session: session.id(),
                    window_id,
                    kind: transition.kind,
                    geometry: remote_geometry,
                    flags: transition.flags,
                });
                self.shared
                    .notifier
                    .publish(&event, Some(transition.origin));
            }
        }
    }

    fn nack(&self, session: SessionId, window_id: Option<u32>, err: &BridgeError) {
        // Negative acknowledgement toward the requesting (remote) side;
        // the session itself continues.
        self.shared.notifier.publish(
            &BridgeEvent::Nack {
                session,
                window_id,
                reason: err.to_string(),
            },
            Some(OpOrigin::Local),
        );
    }

    fn workarea_for(&self, handle: WindowHandle, layout: Option<&MonitorLayout>) -> Result<Rect> {
        let window = self.manager.window(handle)?;
        let layout = layout.ok_or(BridgeError::InvalidTransition {
            detail: "maximize with no monitor layout published",
        })?;
        layout
            .workarea(window.output)
            .ok_or(BridgeError::NotFound {
                table: "output",
                id: window.output.0,
            })
    }

    fn to_remote(&self, geometry: Rect) -> Rect {
        match self.shared.layout.current() {
            Some(layout) => layout.to_remote(geometry),
            // Identity until the first layout is negotiated.
            None => geometry,
        }
    }
}

fn to_local(layout: &Option<Arc<MonitorLayout>>, rect: Rect) -> Rect {
    match layout {
        Some(layout) => layout.to_local(rect),
        None => rect,
    }
}

/// Output existence check shared by both origins; rebinding a window to an
/// output the layout doesn't know is rejected no matter who asked.
fn check_output(layout: Option<&MonitorLayout>, output: OutputId) -> Result<()> {
    if layout.is_some_and(|l| l.output_exists(output)) {
        Ok(())
    } else {
        Err(BridgeError::NotFound {
            table: "output",
            id: output.0,
        })
    }
}

fn needs_layout(op: &WindowOp) -> bool {
    matches!(
        op,
        WindowOp::Move { .. } | WindowOp::Snap { .. } | WindowOp::Maximize | WindowOp::SetOutput { .. }
    )
}

/// Reverse lookup: the session-local window ID bound to `handle`, if any.
fn session_window_id(session: &Session, handle: WindowHandle) -> Option<u32> {
    let mut found = None;
    session.for_each_window(|id, h| {
        if h == handle {
            found = Some(id);
        }
    });
    found
}
