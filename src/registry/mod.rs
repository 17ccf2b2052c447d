//! Resource ID allocator
//!
//! Per-category tables mapping a bounded integer ID to a handle for a
//! compositor object exposed to a remote peer. A session owns one table per
//! category (windows, graphics surfaces, and optionally shared-memory pools
//! and buffers). IDs are unique within a table for the session's lifetime;
//! a freed ID may be reused.
//!
//! All operations on one table are serialized by a single mutex, so an
//! allocation from the protocol thread can safely race a teardown-driven
//! free from the compositor thread. The table also records its owning
//! session and the OS thread id of the most recent mutation, purely as
//! deadlock/reentrancy diagnostics, never used for correctness.
#![expect(
    unsafe_code,
    reason = "libc::gettid() for the mutator-thread diagnostic"
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};
use crate::session::SessionId;

/// Window ID the client uses to mark z-order boundaries; never allocated.
pub const MARKER_WINDOW_ID: u32 = 0xFFFF_FFFE;

/// Window ID representing the remote desktop itself; never allocated.
pub const DESKTOP_WINDOW_ID: u32 = 0xFFFF_FFFF;

/// Point-in-time capacity snapshot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableUsage {
    /// IDs currently bound
    pub used: u32,
    /// Table capacity
    pub total: u32,
}

struct TableInner<T> {
    entries: HashMap<u32, T>,
    /// Scan start for the lowest-free search. Always <= the lowest free ID.
    floor: u32,
}

/// A thread-safe ID table over the inclusive range `[low, high]`.
///
/// `T` is a cheap handle (generation-tagged arena index, token), never an
/// owning reference: freeing an ID detaches the handle without touching the
/// underlying compositor object.
pub struct IdTable<T: Clone> {
    owner: SessionId,
    label: &'static str,
    low: u32,
    high: u32,
    total: u32,
    inner: Mutex<TableInner<T>>,
    last_mutator: AtomicI32,
}

impl<T: Clone> IdTable<T> {
    /// Create an empty table over `[low, high]`, owned by `owner`.
    pub fn new(owner: SessionId, label: &'static str, low: u32, high: u32) -> Result<Self> {
        if low > high {
            return Err(BridgeError::Capacity { table: label, low, high });
        }
        debug!(session = %owner, table = label, low, high, "ID table created");
        Ok(Self {
            owner,
            label,
            low,
            high,
            total: high - low + 1,
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                floor: low,
            }),
            last_mutator: AtomicI32::new(0),
        })
    }

    /// Bind `object` to the lowest available ID and return it.
    pub fn allocate(&self, object: T) -> Result<u32> {
        let mut inner = self.inner.lock();
        let used = inner.entries.len() as u32;
        if used == self.total {
            return Err(BridgeError::Exhausted {
                table: self.label,
                used,
                total: self.total,
            });
        }

        // The floor never skips a free ID: it only advances past IDs that
        // were in use at allocation time, and free() pulls it back down.
        let mut id = inner.floor.max(self.low);
        while inner.entries.contains_key(&id) {
            id += 1;
            debug_assert!(id <= self.high);
        }
        inner.entries.insert(id, object);
        inner.floor = id + 1;
        drop(inner);

        self.note_mutator();
        trace!(table = self.label, id = format_args!("{id:#x}"), "ID allocated");
        Ok(id)
    }

    /// Unbind `id`. Duplicate or stale frees are reported, not fatal; the
    /// caller logs and continues.
    pub fn free(&self, id: u32) -> Result<T> {
        let mut inner = self.inner.lock();
        let Some(object) = inner.entries.remove(&id) else {
            return Err(BridgeError::NotFound { table: self.label, id });
        };
        if id < inner.floor {
            inner.floor = id;
        }
        drop(inner);

        self.note_mutator();
        trace!(table = self.label, id = format_args!("{id:#x}"), "ID freed");
        Ok(object)
    }

    /// Resolve `id` to its bound handle, if any. Serialized with
    /// allocate/free so a lookup never observes a half-updated binding.
    pub fn lookup(&self, id: u32) -> Option<T> {
        self.inner.lock().entries.get(&id).cloned()
    }

    /// Visit every binding while holding the table lock for the full
    /// traversal. Used for diagnostics and mass-detach at teardown.
    pub fn for_each(&self, mut visitor: impl FnMut(u32, &T)) {
        let inner = self.inner.lock();
        for (id, object) in &inner.entries {
            visitor(*id, object);
        }
    }

    /// Remove and return every binding in one locked sweep.
    pub fn drain(&self) -> Vec<(u32, T)> {
        let mut inner = self.inner.lock();
        inner.floor = self.low;
        let drained: Vec<_> = inner.entries.drain().collect();
        drop(inner);
        if !drained.is_empty() {
            self.note_mutator();
        }
        drained
    }

    /// Current used/total counts.
    pub fn usage(&self) -> TableUsage {
        TableUsage {
            used: self.inner.lock().entries.len() as u32,
            total: self.total,
        }
    }

    /// Table label for log lines and error payloads.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Session this table belongs to. Diagnostic only.
    pub fn owner(&self) -> SessionId {
        self.owner
    }

    /// OS thread id that most recently mutated the table. Diagnostic only.
    pub fn last_mutator_tid(&self) -> i32 {
        self.last_mutator.load(Ordering::Relaxed)
    }

    fn note_mutator(&self) {
        // SAFETY: gettid() has no preconditions and cannot fail.
        let tid = unsafe { libc::gettid() as i32 };
        self.last_mutator.store(tid, Ordering::Relaxed);
    }
}

impl<T: Clone> std::fmt::Debug for IdTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let usage = self.usage();
        f.debug_struct("IdTable")
            .field("owner", &self.owner)
            .field("label", &self.label)
            .field("range", &(self.low..=self.high))
            .field("used", &usage.used)
            .field("total", &usage.total)
            .finish()
    }
}
