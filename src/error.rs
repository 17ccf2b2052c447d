//! Bridge error taxonomy
//!
//! Typed errors for the session bridge subsystems. Allocator and dispatcher
//! errors are returned to the immediate caller and never cross the thread
//! boundary; synchronizer errors become negative acknowledgements toward the
//! requesting side. Only `DispatchUnavailable` during session bootstrap is
//! fatal to the session.

use thiserror::Error;

/// Errors produced by the session bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// ID table configured with an inverted range.
    #[error("ID table '{table}' misconfigured: low {low:#x} > high {high:#x}")]
    Capacity {
        /// Table label (for diagnostics)
        table: &'static str,
        /// Lower bound of the requested range
        low: u32,
        /// Upper bound of the requested range
        high: u32,
    },

    /// No free IDs remain in the table. Recoverable: the caller may retry
    /// after freeing IDs or report resource pressure.
    #[error("ID table '{table}' exhausted ({used} of {total} in use)")]
    Exhausted {
        /// Table label
        table: &'static str,
        /// IDs currently bound
        used: u32,
        /// Table capacity
        total: u32,
    },

    /// Stale or duplicate reference: the ID (or handle) is not currently
    /// bound. Logged and non-fatal.
    #[error("ID {id:#x} not found in table '{table}'")]
    NotFound {
        /// Table label
        table: &'static str,
        /// The unbound ID
        id: u32,
    },

    /// The compositor-thread wakeup path is unavailable. Fatal to session
    /// initialization; a dead session cannot accept work.
    #[error("task dispatch unavailable: {reason}")]
    DispatchUnavailable {
        /// Why dispatch failed
        reason: &'static str,
    },

    /// The window state machine was asked to perform a transition that is
    /// not valid from its current state. Rejected, caller notified, session
    /// continues.
    #[error("invalid window transition: {detail}")]
    InvalidTransition {
        /// Which transition was rejected and why
        detail: &'static str,
    },

    /// Proposed monitor topology rejected; the prior layout stays active.
    #[error("monitor layout rejected: {0}")]
    Layout(String),
}

/// Convenience alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;
