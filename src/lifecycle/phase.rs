//! Process lifecycle phases.
//!
//! # State Transitions
//! ```text
//! Init → ConfigLoaded → DatabaseReady → Serving → Draining → Stopped
//! ```
//! Only forward moves are accepted. Phases may be skipped (a failed startup
//! goes straight to `Stopped`). Registry rebuilds during hot reload happen
//! inside `Serving` and do not change the phase.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::lifecycle::LifecycleError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Init = 0,
    ConfigLoaded = 1,
    DatabaseReady = 2,
    Serving = 3,
    Draining = 4,
    Stopped = 5,
}

impl From<u8> for LifecyclePhase {
    fn from(val: u8) -> Self {
        match val {
            0 => LifecyclePhase::Init,
            1 => LifecyclePhase::ConfigLoaded,
            2 => LifecyclePhase::DatabaseReady,
            3 => LifecyclePhase::Serving,
            4 => LifecyclePhase::Draining,
            _ => LifecyclePhase::Stopped,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Init => "init",
            LifecyclePhase::ConfigLoaded => "config_loaded",
            LifecyclePhase::DatabaseReady => "database_ready",
            LifecyclePhase::Serving => "serving",
            LifecyclePhase::Draining => "draining",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free view of the current phase.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: AtomicU8,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(LifecyclePhase::Init as u8),
        }
    }

    pub fn current(&self) -> LifecyclePhase {
        LifecyclePhase::from(self.phase.load(Ordering::Acquire))
    }

    /// Move to `next`. Fails if `next` is not strictly after the current phase.
    pub fn advance(&self, next: LifecyclePhase) -> Result<(), LifecycleError> {
        self.phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .map(|previous| {
                tracing::debug!(from = %LifecyclePhase::from(previous), to = %next, "Lifecycle phase");
            })
            .map_err(|current| LifecycleError::Phase {
                from: LifecyclePhase::from(current),
                to: next,
            })
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
