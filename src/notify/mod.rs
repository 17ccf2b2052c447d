//! Transition notifications
//!
//! The synchronizer publishes window transitions as events; the protocol
//! layer and the local shell consume them independently through an explicit
//! subscription registry. Each subscriber declares which side it sits on,
//! and events are never delivered back to the side that originated the
//! transition — the request/notify feedback-loop guard.
//!
//! Delivery is fire-and-forget over unbounded channels: the publisher
//! never blocks on a slow consumer, and a dropped receiver just prunes the
//! subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::layout::Rect;
use crate::session::SessionId;
use crate::window::{OpOrigin, StateFlags, TransitionKind};

/// A window transition as seen by a consumer. Geometry is already in
/// remote (client) coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    /// Session the window ID belongs to.
    pub session: SessionId,
    /// Peer-visible window ID.
    pub window_id: u32,
    /// What happened.
    pub kind: TransitionKind,
    /// Geometry after the transition, client space.
    pub geometry: Rect,
    /// State flags after the transition.
    pub flags: StateFlags,
}

/// Everything the bridge publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A window changed state or geometry.
    Window(WindowEvent),
    /// Coalesced stacking update: window IDs top to bottom.
    ZOrder {
        /// Session the IDs belong to.
        session: SessionId,
        /// Top to bottom, minimized tier last.
        window_ids: Vec<u32>,
    },
    /// A proposed monitor layout was accepted and published.
    LayoutAccepted {
        /// Session that proposed it.
        session: SessionId,
        /// The published layout version.
        version: u64,
    },
    /// A requested transition was rejected; negative acknowledgement
    /// toward the requesting side.
    Nack {
        /// Session whose request was rejected.
        session: SessionId,
        /// The window the request named, when it named one.
        window_id: Option<u32>,
        /// Human-readable rejection reason.
        reason: String,
    },
}

struct Subscriber {
    side: OpOrigin,
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

/// Live subscription: the event stream plus the key to unsubscribe.
pub struct EventStream {
    /// Subscription key, for [`Notifier::unsubscribe`].
    pub id: u64,
    /// The event channel.
    pub rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

/// Subscription registry the synchronizer publishes into.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer on `side`. Dropping the returned stream (or
    /// calling [`unsubscribe`](Self::unsubscribe)) ends delivery.
    pub fn subscribe(&self, side: OpOrigin) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, Subscriber { side, tx });
        EventStream { id, rx }
    }

    /// Remove a subscription by its key.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    /// Deliver `event` to every subscriber except those on `exclude` (the
    /// origin side of the transition). Closed channels are pruned.
    pub fn publish(&self, event: &BridgeEvent, exclude: Option<OpOrigin>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, sub| {
            if exclude == Some(sub.side) {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    trace!(subscription = id, "pruning closed subscriber");
                    false
                }
            }
        });
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
