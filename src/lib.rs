//! # lamco-rail-bridge
//!
//! Remote-application session bridge: exposes individual compositor shell
//! surfaces as first-class windows on a remote peer's desktop, instead of
//! remoting one full-screen desktop.
//!
//! # Architecture
//!
//! ```text
//! lamco-rail-bridge
//!   ├─> Session (per peer: ID tables + deferred-task queue)
//!   ├─> Dispatcher (protocol thread → compositor thread handoff)
//!   ├─> Window Synchronizer (arena, z-order, focus, state machine)
//!   ├─> Layout (client ↔ compositor coordinate transforms)
//!   └─> Notifier (transition fan-out, origin side excluded)
//! ```
//!
//! # Data Flow
//!
//! **Remote → Local:** peer request → [`BridgeHandle`] → session queue →
//! compositor loop → synchronizer → notification to the local shell
//!
//! **Local → Remote:** shell callback → [`Bridge`] → synchronizer →
//! notification to the peer, geometry converted to client coordinates
//!
//! Two threading contexts exist: protocol threads (one per peer) and the
//! single compositor thread. Everything crossing between them goes through
//! the dispatcher or the notifier; nothing else is shared mutable.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Explicit bridge context and the compositor drain loop
pub mod bridge;

/// Bridge configuration
pub mod config;

/// Cross-thread task dispatch with exactly-once completion
pub mod dispatch;

/// Typed bridge errors
pub mod error;

/// Monitor layout validation and coordinate transforms
pub mod layout;

/// Transition notification fan-out
pub mod notify;

/// Bounded per-session resource ID tables
pub mod registry;

/// Per-peer session lifecycle
pub mod session;

/// Diagnostics and log setup
pub mod telemetry;

/// Window state synchronizer
pub mod window;

pub use bridge::{Bridge, BridgeHandle};
pub use config::Config;
pub use error::{BridgeError, Result};
