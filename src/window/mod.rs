//! Window state synchronizer
//!
//! Compositor-thread-only. Keeps each exposed window's remote-visible state
//! (geometry, z-order, maximized/minimized/snapped/fullscreen) consistent
//! with the compositor's internal state, regardless of whether a transition
//! was requested by the remote peer or by local shell policy.
//!
//! Windows live in a generational arena: a [`WindowHandle`] is an index plus
//! a generation tag, so a freed-and-reused slot can never alias a destroyed
//! window. ID tables store these handles, never owning references.
//!
//! Must never be invoked from the protocol thread; protocol-initiated
//! operations arrive through the task dispatcher.

mod surface;
mod zorder;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use surface::{RestoreTarget, StateFlags, WindowState, WindowSurface};
pub use zorder::ZOrder;

use crate::error::{BridgeError, Result};
use crate::layout::{OutputId, Rect};

/// Generation-tagged handle into the window arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One input seat, for focus bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatId(pub u32);

/// Which side requested a transition. Notifications are never echoed back
/// to the origin, preventing request/notify feedback loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOrigin {
    /// The remote peer's window chrome.
    Remote,
    /// Local compositor/shell policy.
    Local,
}

/// What kind of transition a window underwent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // variant names are the documentation
pub enum TransitionKind {
    Mapped,
    Minimized,
    Maximized,
    Restored,
    Moved,
    Snapped,
    Activated,
    CloseRequested,
    Unresponsive,
    FullscreenChanged,
    OutputChanged,
    Destroyed,
}

/// Outcome of a synchronizer operation, fed to the notification registry.
/// Geometry is compositor-space; the bridge converts to remote coordinates
/// before publishing.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    /// The window that changed.
    pub handle: WindowHandle,
    /// What happened.
    pub kind: TransitionKind,
    /// Geometry after the transition, compositor space.
    pub geometry: Rect,
    /// State flags after the transition.
    pub flags: StateFlags,
    /// Which side requested it.
    pub origin: OpOrigin,
}

struct Slot {
    generation: u32,
    occupant: Option<WindowSurface>,
}

/// Generational arena of windows.
#[derive(Default)]
pub struct WindowArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl WindowArena {
    fn insert(&mut self, window: WindowSurface) -> WindowHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupant = Some(window);
            WindowHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 1,
                occupant: Some(window),
            });
            WindowHandle {
                index,
                generation: 1,
            }
        }
    }

    fn get(&self, handle: WindowHandle) -> Option<&WindowSurface> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.occupant.as_ref()
    }

    fn get_mut(&mut self, handle: WindowHandle) -> Option<&mut WindowSurface> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.occupant.as_mut()
    }

    fn remove(&mut self, handle: WindowHandle) -> Option<WindowSurface> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let window = slot.occupant.take()?;
        // Bump the generation so stale handles to this slot go dead.
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(window)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.occupant.is_some()).count()
    }
}

/// The per-compositor window synchronizer: arena, stacking order, focus,
/// and the closing-timeout scan.
pub struct WindowManager {
    arena: WindowArena,
    zorder: ZOrder,
    focus: Option<(SeatId, WindowHandle)>,
    closing_timeout: Duration,
}

impl WindowManager {
    pub fn new(closing_timeout: Duration) -> Self {
        Self {
            arena: WindowArena::default(),
            zorder: ZOrder::new(),
            focus: None,
            closing_timeout,
        }
    }

    /// Register a new shell surface. The window starts in `Created` and
    /// joins the stacking order on its first commit.
    pub fn create(
        &mut self,
        title: String,
        geometry: Rect,
        output: OutputId,
        parent: Option<WindowHandle>,
    ) -> Result<WindowHandle> {
        if let Some(parent) = parent {
            // Validate before inserting so a bad parent leaks nothing.
            self.window(parent)?;
        }
        let mut window = WindowSurface::new(title, geometry, output);
        window.parent = parent;
        let handle = self.arena.insert(window);
        if let Some(parent) = parent {
            if let Some(p) = self.arena.get_mut(parent) {
                p.children.push(handle);
            }
        }
        debug!(?handle, "window created");
        Ok(handle)
    }

    /// First commit maps the window; later commits are no-ops here.
    pub fn commit(&mut self, handle: WindowHandle) -> Result<Option<Transition>> {
        let window = self.window_mut(handle)?;
        if window.is_mapped() {
            return Ok(None);
        }
        window.state = WindowState::Normal;
        let t = Self::transition(window, handle, TransitionKind::Mapped, OpOrigin::Local);
        self.zorder.insert_top(handle);
        Ok(Some(t))
    }

    /// Hide the window and drop it to the below-all tier. Releases focus if
    /// the window held it.
    pub fn minimize(&mut self, handle: WindowHandle, origin: OpOrigin) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        let from = match window.state {
            WindowState::Normal => RestoreTarget::Normal,
            WindowState::Maximized => RestoreTarget::Maximized,
            WindowState::Snapped => RestoreTarget::Snapped,
            WindowState::Created => {
                return Err(invalid("minimize before first commit"));
            }
            WindowState::Minimized => {
                return Err(invalid("minimize while already minimized"));
            }
            WindowState::Closing => {
                return Err(invalid("minimize while closing"));
            }
        };
        window.minimized_from = Some(from);
        window.state = WindowState::Minimized;
        let t = Self::transition(window, handle, TransitionKind::Minimized, origin);
        self.zorder.sink_minimized(handle);
        if self.focus.map(|(_, h)| h) == Some(handle) {
            self.focus = None;
        }
        Ok(t)
    }

    /// Maximize into `workarea` (the claiming output's work area, computed
    /// by the caller from the active layout). Snapshots the pre-maximize
    /// geometry; maximizing a snapped window remembers the snap so one
    /// restore returns to it.
    pub fn maximize(
        &mut self,
        handle: WindowHandle,
        workarea: Rect,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        match window.state {
            WindowState::Normal => {
                window.pre_maximize = Some(window.geometry);
                window.maximized_from_snap = false;
            }
            WindowState::Snapped => {
                window.pre_maximize = Some(window.geometry);
                window.maximized_from_snap = true;
            }
            WindowState::Maximized => {
                return Err(invalid("maximize while already maximized"));
            }
            WindowState::Created => return Err(invalid("maximize before first commit")),
            WindowState::Minimized => return Err(invalid("maximize while minimized")),
            WindowState::Closing => return Err(invalid("maximize while closing")),
        }
        window.state = WindowState::Maximized;
        window.geometry = workarea;
        Ok(Self::transition(window, handle, TransitionKind::Maximized, origin))
    }

    /// Undo the most recent maximize or snap, recovering the snapshotted
    /// geometry exactly. Rejected when no snapshot exists; geometry is left
    /// unchanged in that case.
    pub fn restore(&mut self, handle: WindowHandle, origin: OpOrigin) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        match window.state {
            WindowState::Maximized => {
                let Some(saved) = window.pre_maximize.take() else {
                    return Err(invalid("restore with no pre-maximize geometry"));
                };
                window.geometry = saved;
                if window.maximized_from_snap {
                    window.maximized_from_snap = false;
                    window.state = WindowState::Snapped;
                } else {
                    window.state = WindowState::Normal;
                }
            }
            WindowState::Snapped => {
                let Some(saved) = window.pre_snap.take() else {
                    return Err(invalid("restore with no pre-snap geometry"));
                };
                window.geometry = saved;
                window.state = WindowState::Normal;
            }
            _ => return Err(invalid("restore with nothing to restore")),
        }
        Ok(Self::transition(window, handle, TransitionKind::Restored, origin))
    }

    /// Plain geometry update; state is untouched.
    pub fn move_window(
        &mut self,
        handle: WindowHandle,
        geometry: Rect,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        if !window.is_mapped() {
            return Err(invalid("move before first commit"));
        }
        window.geometry = geometry;
        Ok(Self::transition(window, handle, TransitionKind::Moved, origin))
    }

    /// Constrain the window to `target`. The pre-snap geometry is
    /// snapshotted on first entry only; while already snapped, repeated
    /// snaps just update the target rect. Snapping a maximized window
    /// consumes the pre-maximize snapshot as the pre-snap snapshot, so a
    /// restore lands on the original floating geometry.
    pub fn snap(
        &mut self,
        handle: WindowHandle,
        target: Rect,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        match window.state {
            WindowState::Normal => {
                if window.pre_snap.is_none() {
                    window.pre_snap = Some(window.geometry);
                }
            }
            WindowState::Snapped => {} // re-snap: update target only
            WindowState::Maximized => {
                if window.pre_snap.is_none() {
                    window.pre_snap = window.pre_maximize.take();
                } else {
                    window.pre_maximize = None;
                }
                window.maximized_from_snap = false;
            }
            WindowState::Created => return Err(invalid("snap before first commit")),
            WindowState::Minimized => return Err(invalid("snap while minimized")),
            WindowState::Closing => return Err(invalid("snap while closing")),
        }
        window.state = WindowState::Snapped;
        window.geometry = target;
        Ok(Self::transition(window, handle, TransitionKind::Snapped, origin))
    }

    /// Raise to the top of the z-order and grant `seat` focus. A minimized
    /// window is implicitly unminimized first.
    pub fn activate(
        &mut self,
        handle: WindowHandle,
        seat: SeatId,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        if !window.is_mapped() {
            return Err(invalid("activate before first commit"));
        }
        if window.state == WindowState::Minimized {
            let target = window.minimized_from.take().unwrap_or(RestoreTarget::Normal);
            window.state = match target {
                RestoreTarget::Normal => WindowState::Normal,
                RestoreTarget::Maximized => WindowState::Maximized,
                RestoreTarget::Snapped => WindowState::Snapped,
            };
            self.zorder.unminimize(handle);
        }
        let window = self.window_mut(handle)?;
        let t = Self::transition(window, handle, TransitionKind::Activated, origin);
        self.zorder.raise(handle);
        self.focus = Some((seat, handle));
        Ok(t)
    }

    /// Advisory close: the application may refuse or delay destruction. A
    /// window stuck in `Closing` past the configured timeout is surfaced as
    /// unresponsive by [`scan_closing`](Self::scan_closing), never forced.
    pub fn close(&mut self, handle: WindowHandle, origin: OpOrigin) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        if !window.is_mapped() {
            return Err(invalid("close before first commit"));
        }
        if window.state != WindowState::Closing {
            window.state = WindowState::Closing;
            window.closing_since = Some(Instant::now());
            window.unresponsive_reported = false;
        }
        Ok(Self::transition(window, handle, TransitionKind::CloseRequested, origin))
    }

    /// Rebind which output claims the window for fullscreen purposes.
    /// Output existence is validated by the caller against the active
    /// layout.
    pub fn set_output(
        &mut self,
        handle: WindowHandle,
        output: OutputId,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        window.output = output;
        Ok(Self::transition(window, handle, TransitionKind::OutputChanged, origin))
    }

    /// Flip the orthogonal fullscreen bit. Driven by compositor callbacks
    /// (became-fullscreen) or remote requests.
    pub fn set_fullscreen(
        &mut self,
        handle: WindowHandle,
        fullscreen: bool,
        origin: OpOrigin,
    ) -> Result<Transition> {
        let window = self.window_mut(handle)?;
        if !window.is_mapped() {
            return Err(invalid("fullscreen before first commit"));
        }
        window.fullscreen = fullscreen;
        Ok(Self::transition(window, handle, TransitionKind::FullscreenChanged, origin))
    }

    /// Remove the window entirely: unlink transient relatives, drop it from
    /// the stacking order, release focus, invalidate the handle.
    pub fn destroy(&mut self, handle: WindowHandle) -> Result<Transition> {
        let window = self
            .arena
            .remove(handle)
            .ok_or_else(|| stale_handle(handle))?;
        if let Some(parent) = window.parent {
            if let Some(p) = self.arena.get_mut(parent) {
                p.children.retain(|c| *c != handle);
            }
        }
        for child in &window.children {
            if let Some(c) = self.arena.get_mut(*child) {
                c.parent = None;
            }
        }
        self.zorder.remove(handle);
        if self.focus.map(|(_, h)| h) == Some(handle) {
            self.focus = None;
        }
        debug!(?handle, "window destroyed");
        Ok(Transition {
            handle,
            kind: TransitionKind::Destroyed,
            geometry: window.geometry,
            flags: window.flags(),
            origin: OpOrigin::Local,
        })
    }

    /// Read access for repaint and hit-testing queries.
    pub fn window(&self, handle: WindowHandle) -> Result<&WindowSurface> {
        self.arena.get(handle).ok_or_else(|| stale_handle(handle))
    }

    fn window_mut(&mut self, handle: WindowHandle) -> Result<&mut WindowSurface> {
        self.arena
            .get_mut(handle)
            .ok_or_else(|| stale_handle(handle))
    }

    /// Window currently holding focus, if any.
    pub fn focused(&self) -> Option<WindowHandle> {
        self.focus.map(|(_, h)| h)
    }

    /// Number of live windows.
    pub fn window_count(&self) -> usize {
        self.arena.len()
    }

    /// Handles of every mapped window, for initial sync toward a freshly
    /// connected session.
    pub fn mapped_windows(&self) -> Vec<WindowHandle> {
        self.arena
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let window = slot.occupant.as_ref()?;
                window.is_mapped().then_some(WindowHandle {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }

    /// Consume the z-order dirty flag; called once per repaint cycle.
    pub fn flush_zorder(&mut self) -> Option<Vec<WindowHandle>> {
        self.zorder.take_if_dirty()
    }

    /// Surface windows stuck in `Closing` past the timeout as unresponsive,
    /// once per close request. They are never force-destroyed.
    pub fn scan_closing(&mut self, now: Instant) -> Vec<Transition> {
        let timeout = self.closing_timeout;
        let mut out = Vec::new();
        for (index, slot) in self.arena.slots.iter_mut().enumerate() {
            let Some(window) = slot.occupant.as_mut() else {
                continue;
            };
            if window.state != WindowState::Closing || window.unresponsive_reported {
                continue;
            }
            let Some(since) = window.closing_since else {
                continue;
            };
            if now.duration_since(since) >= timeout {
                window.unresponsive_reported = true;
                let handle = WindowHandle {
                    index: index as u32,
                    generation: slot.generation,
                };
                warn!(?handle, title = %window.title, "window unresponsive to close request");
                out.push(Transition {
                    handle,
                    kind: TransitionKind::Unresponsive,
                    geometry: window.geometry,
                    flags: window.flags(),
                    origin: OpOrigin::Local,
                });
            }
        }
        out
    }

    fn transition(
        window: &WindowSurface,
        handle: WindowHandle,
        kind: TransitionKind,
        origin: OpOrigin,
    ) -> Transition {
        Transition {
            handle,
            kind,
            geometry: window.geometry,
            flags: window.flags(),
            origin,
        }
    }
}

fn invalid(detail: &'static str) -> BridgeError {
    BridgeError::InvalidTransition { detail }
}

fn stale_handle(handle: WindowHandle) -> BridgeError {
    BridgeError::NotFound {
        table: "window-arena",
        id: handle.index,
    }
}
