//! Governed execution modes.
//!
//! All three modes go through the same [`HierarchyGovernor`]: a unit is
//! admitted and registered before any work starts, heartbeats while it runs,
//! and is removed from the registry when it finishes.
//!
//! - [`CooperativeScheduler`]: single thread, explicit yield points
//! - [`ThreadSpawner`]: one OS thread per unit
//! - [`ProcessSpawner`]: one OS process per unit

pub mod process;
pub mod simulated;
pub mod thread;

use crate::spawn::HierarchyGovernor;
use crate::types::UnitId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use process::{GovernedChild, ProcessSpawner, ReapReport};
pub use simulated::{CooperativeScheduler, CycleReport, Step};
pub use thread::{GovernedThread, ThreadSpawner};

/// Handle given to governed work.
///
/// Work calls [`heartbeat`](Self::heartbeat) to report liveness and polls
/// [`should_terminate`](Self::should_terminate) to notice destroy policies.
#[derive(Debug, Clone)]
pub struct UnitContext {
    unit: UnitId,
    governor: Arc<HierarchyGovernor>,
    signal: Arc<AtomicBool>,
}

impl UnitContext {
    pub(crate) fn new(unit: UnitId, governor: Arc<HierarchyGovernor>) -> Self {
        let signal = governor
            .termination_flag(unit)
            .unwrap_or_else(|| Arc::new(AtomicBool::new(true)));
        Self {
            unit,
            governor,
            signal,
        }
    }

    /// The unit this work runs as.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// The governing hierarchy.
    #[must_use]
    pub const fn governor(&self) -> &Arc<HierarchyGovernor> {
        &self.governor
    }

    /// Reports liveness. Returns false once the unit is no longer registered.
    pub fn heartbeat(&self) -> bool {
        self.governor.heartbeat(self.unit)
    }

    /// True once a destroy policy has signalled or removed the unit.
    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.signal.load(Ordering::Acquire)
    }
}
