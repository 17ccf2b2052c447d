//! Session lifecycle
//!
//! One `Session` per connected remote peer. It owns the per-category ID
//! tables (windows, graphics surfaces, and optionally shared-memory pools
//! and buffers), the deferred-task queue, and the bookkeeping for which
//! windows are currently exposed to that peer.
//!
//! Teardown order matters: mark the queue dead, resolve still-queued tasks
//! free-only, then detach (not destroy) the compositor windows while
//! freeing their table entries, and only then drop the tables.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatch::{SessionQueue, Task};
use crate::error::Result;
use crate::registry::{IdTable, TableUsage, MARKER_WINDOW_ID};
use crate::window::WindowHandle;

/// Identifies one remote peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Opaque token for a graphics surface (or shared-memory pool/buffer)
/// registered with the render pipeline. The bridge only brokers the IDs.
pub type SurfaceToken = u64;

/// ID ranges and optional categories for a session's tables.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Lowest window ID handed to the peer.
    pub window_id_low: u32,
    /// Highest window ID handed to the peer.
    pub window_id_high: u32,
    /// Lowest graphics surface ID.
    pub surface_id_low: u32,
    /// Highest graphics surface ID.
    pub surface_id_high: u32,
    /// Enable pool/buffer tables for shared-memory graphics redirection.
    pub shared_memory: bool,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            window_id_low: 0x1,
            // Stay clear of the reserved marker and desktop window IDs.
            window_id_high: MARKER_WINDOW_ID - 1,
            surface_id_low: 0x1,
            surface_id_high: 0xFFFF_FFFF,
            shared_memory: false,
        }
    }
}

/// Everything scoped to one connected peer.
pub struct Session {
    id: SessionId,
    window_ids: IdTable<WindowHandle>,
    surface_ids: IdTable<SurfaceToken>,
    pool_ids: Option<IdTable<SurfaceToken>>,
    buffer_ids: Option<IdTable<SurfaceToken>>,
    queue: Arc<SessionQueue>,
}

impl Session {
    /// Create a session with its ID tables and an empty task queue.
    pub fn new(id: SessionId, limits: SessionLimits) -> Result<Arc<Self>> {
        let pool_ids = if limits.shared_memory {
            Some(IdTable::new(id, "pool", 0x1, 0xFFFF_FFFF)?)
        } else {
            None
        };
        let buffer_ids = if limits.shared_memory {
            Some(IdTable::new(id, "buffer", 0x1, 0xFFFF_FFFF)?)
        } else {
            None
        };
        let session = Arc::new(Self {
            id,
            window_ids: IdTable::new(id, "window", limits.window_id_low, limits.window_id_high)?,
            surface_ids: IdTable::new(id, "surface", limits.surface_id_low, limits.surface_id_high)?,
            pool_ids,
            buffer_ids,
            queue: Arc::new(SessionQueue::new()),
        });
        info!(session = %id, "session created");
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The deferred-task queue shared with the dispatcher.
    pub fn queue(&self) -> &Arc<SessionQueue> {
        &self.queue
    }

    /// Whether teardown has begun.
    pub fn is_dead(&self) -> bool {
        self.queue.is_dead()
    }

    /// Expose a compositor window to this peer, returning its
    /// protocol-visible window ID.
    pub fn expose_window(&self, handle: WindowHandle) -> Result<u32> {
        self.window_ids.allocate(handle)
    }

    /// Resolve a protocol-visible window ID to its arena handle.
    pub fn resolve_window(&self, window_id: u32) -> Option<WindowHandle> {
        self.window_ids.lookup(window_id)
    }

    /// Stop exposing a window. The compositor window itself survives; only
    /// the binding goes away. Duplicate frees are logged, not fatal.
    pub fn detach_window(&self, window_id: u32) -> Option<WindowHandle> {
        match self.window_ids.free(window_id) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(session = %self.id, %err, "detach of unbound window ID");
                None
            }
        }
    }

    /// Register a graphics surface, returning its protocol-visible ID.
    pub fn register_surface(&self, token: SurfaceToken) -> Result<u32> {
        self.surface_ids.allocate(token)
    }

    /// Resolve a surface ID.
    pub fn resolve_surface(&self, surface_id: u32) -> Option<SurfaceToken> {
        self.surface_ids.lookup(surface_id)
    }

    /// Unregister a graphics surface.
    pub fn unregister_surface(&self, surface_id: u32) -> Option<SurfaceToken> {
        match self.surface_ids.free(surface_id) {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(session = %self.id, %err, "free of unbound surface ID");
                None
            }
        }
    }

    /// Visit every exposed window binding. Used for reverse lookups when
    /// fanning out notifications.
    pub fn for_each_window(&self, mut visitor: impl FnMut(u32, WindowHandle)) {
        self.window_ids.for_each(|id, handle| visitor(id, *handle));
    }

    /// Pool table accessor; present only with shared memory enabled.
    pub fn pool_ids(&self) -> Option<&IdTable<SurfaceToken>> {
        self.pool_ids.as_ref()
    }

    /// Buffer table accessor; present only with shared memory enabled.
    pub fn buffer_ids(&self) -> Option<&IdTable<SurfaceToken>> {
        self.buffer_ids.as_ref()
    }

    /// Begin teardown: mark the queue dead and hand back every still-queued
    /// task for free-only completion. Called exactly once, on the
    /// compositor thread, before the tables are emptied.
    pub fn begin_teardown(&self) -> Vec<Task> {
        debug!(session = %self.id, "session teardown started");
        self.queue.drain_free_only()
    }

    /// Detach every exposed window in one sweep. Returns the freed
    /// `(window_id, handle)` pairs; the caller decides what the underlying
    /// windows do next (they usually outlive the session).
    pub fn detach_all_windows(&self) -> Vec<(u32, WindowHandle)> {
        let detached = self.window_ids.drain();
        if !detached.is_empty() {
            info!(
                session = %self.id,
                count = detached.len(),
                "detached exposed windows at teardown"
            );
        }
        detached
    }

    /// Per-table usage snapshot for capacity diagnostics.
    pub fn table_usage(&self) -> Vec<(&'static str, TableUsage)> {
        let mut usage = vec![
            (self.window_ids.label(), self.window_ids.usage()),
            (self.surface_ids.label(), self.surface_ids.usage()),
        ];
        if let Some(pools) = &self.pool_ids {
            usage.push((pools.label(), pools.usage()));
        }
        if let Some(buffers) = &self.buffer_ids {
            usage.push((buffers.label(), buffers.usage()));
        }
        usage
    }
}
