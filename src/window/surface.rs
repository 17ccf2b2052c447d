//! Per-window state
//!
//! A `WindowSurface` is the bridge's view of one compositor shell surface
//! exposed to the remote peer: geometry in compositor space, the primary
//! state, the orthogonal fullscreen bit, saved-geometry snapshots for
//! restore, and transient parent/child links (stacking only, independent of
//! the render hierarchy).

use std::time::Instant;

use crate::layout::{OutputId, Rect};

use super::WindowHandle;

/// Primary window state. `Destroyed` has no variant: destruction removes
/// the window from the arena, and its generation-tagged handle goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Surface created but not yet committed/mapped.
    Created,
    /// Mapped, floating geometry.
    Normal,
    /// Occupying the work area; pre-maximize geometry snapshotted.
    Maximized,
    /// Hidden, on the below-all z-order tier.
    Minimized,
    /// Constrained to a client-chosen screen region (e.g. half-screen).
    Snapped,
    /// Close requested; the application may refuse or delay.
    Closing,
}

/// Remote-visible state flags, sent with every transition notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags {
    /// Maximized, or minimized with a maximize to return to.
    pub maximized: bool,
    /// Currently minimized.
    pub minimized: bool,
    /// Snapped, or minimized with a snap to return to.
    pub snapped: bool,
    /// The orthogonal fullscreen bit.
    pub fullscreen: bool,
    /// A maximize was entered from the snapped state; restore returns to
    /// the snapped rect first.
    pub snap_pending_maximize: bool,
}

/// The state a minimized window returns to on unminimize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    /// Floating geometry.
    Normal,
    /// Back to maximized.
    Maximized,
    /// Back to the snapped rect.
    Snapped,
}

/// The bridge's view of one exposed shell surface.
#[derive(Debug)]
pub struct WindowSurface {
    /// Title advertised to the remote peer.
    pub title: String,
    /// Current geometry, compositor logical space.
    pub geometry: Rect,
    /// Geometry to recover on restore-from-maximize.
    pub pre_maximize: Option<Rect>,
    /// Geometry to recover on restore-from-snap. Snapshotted on first snap
    /// entry only; repeated snaps keep it.
    pub pre_snap: Option<Rect>,
    /// State to return to on unminimize.
    pub minimized_from: Option<RestoreTarget>,
    /// Maximize entered while snapped (one restore returns to the snap).
    pub maximized_from_snap: bool,
    /// Current primary state.
    pub state: WindowState,
    /// Orthogonal to `state`: a window can be fullscreen and still carry a
    /// remembered maximize/snap to return to.
    pub fullscreen: bool,
    /// Output claiming the window for fullscreen purposes.
    pub output: OutputId,
    /// Transient parent, stacking only.
    pub parent: Option<WindowHandle>,
    /// Transient children, stacking only.
    pub children: Vec<WindowHandle>,
    /// When the close request was issued; drives the unresponsive warning.
    pub closing_since: Option<Instant>,
    /// Unresponsive warning already surfaced for this close request.
    pub unresponsive_reported: bool,
}

impl WindowSurface {
    /// A fresh, unmapped surface.
    pub fn new(title: String, geometry: Rect, output: OutputId) -> Self {
        Self {
            title,
            geometry,
            pre_maximize: None,
            pre_snap: None,
            minimized_from: None,
            maximized_from_snap: false,
            state: WindowState::Created,
            fullscreen: false,
            output,
            parent: None,
            children: Vec::new(),
            closing_since: None,
            unresponsive_reported: false,
        }
    }

    /// Remote-visible flags for the current state. Minimized windows keep
    /// advertising the maximize or snap they will return to.
    pub fn flags(&self) -> StateFlags {
        StateFlags {
            maximized: self.state == WindowState::Maximized
                || self.minimized_from == Some(RestoreTarget::Maximized),
            minimized: self.state == WindowState::Minimized,
            snapped: self.state == WindowState::Snapped
                || self.minimized_from == Some(RestoreTarget::Snapped),
            fullscreen: self.fullscreen,
            snap_pending_maximize: self.maximized_from_snap,
        }
    }

    /// Whether the window has been mapped (first commit seen).
    pub fn is_mapped(&self) -> bool {
        self.state != WindowState::Created
    }
}
