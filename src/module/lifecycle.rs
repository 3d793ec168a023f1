//! Lifecycle vocabulary shared by modules and the server.

use std::sync::atomic::{AtomicU8, Ordering};

/// Server lifecycle state a hook is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Resources are being created (connections, caches).
    Init,
    /// Modules start consuming their mailboxes.
    Run,
    /// Process is shutting down.
    Stop,
}

/// Whether a hook runs before or after the server enters a [`ServerState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Before,
    After,
}

/// Observable state of one module.
///
/// `Created → Running → Draining → Stopped`; `Stopped` is terminal.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Mounted, mailbox not consumed yet.
    Created = 0,
    /// Dispatching mailbox items.
    Running = 1,
    /// Stop requested; `After(Stop)` hooks are running.
    Draining = 2,
    /// Run loop has exited.
    Stopped = 3,
}

/// Atomic cell holding a [`Phase`]; transitions only move forward.
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Phase::Created as u8))
    }

    pub(crate) fn get(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            0 => Phase::Created,
            1 => Phase::Running,
            2 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }

    pub(crate) fn advance(&self, to: Phase) {
        self.0.fetch_max(to as u8, Ordering::AcqRel);
    }
}
