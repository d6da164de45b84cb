//! Per-unit concurrency policy.

use crate::config::{DEFAULT_MAX_CHILDREN_PER_PARENT, DEFAULT_MAX_HIERARCHY_DEPTH};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a governed unit executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Cooperative, single-threaded, explicit yield points.
    Simulated,
    /// Preemptive OS thread in the shared address space.
    #[default]
    Thread,
    /// Isolated OS process.
    Process,
}

impl ExecutionMode {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Thread => "thread",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a unit's children when it terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DestroyPolicy {
    /// Force-terminate all children.
    #[default]
    Cascade,
    /// Detach children and re-parent them to the nearest surviving ancestor.
    KeepAlive,
    /// Signal children, wait up to the grace period, then cascade.
    Graceful,
    /// Terminate without waiting; children are orphaned until swept.
    Immediate,
}

impl DestroyPolicy {
    /// All policies, in declaration order.
    pub const ALL: [Self; 4] = [Self::Cascade, Self::KeepAlive, Self::Graceful, Self::Immediate];

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cascade => "cascade",
            Self::KeepAlive => "keep_alive",
            Self::Graceful => "graceful",
            Self::Immediate => "immediate",
        }
    }
}

impl fmt::Display for DestroyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration attached to a spawn request.
///
/// Consulted, never mutated, by the governor once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyPolicy {
    /// Execution mode of the unit.
    pub mode: ExecutionMode,
    /// Applied to the unit's children when it terminates.
    pub destroy_policy: DestroyPolicy,
    /// Live children this unit may hold.
    pub max_children: usize,
    /// Wall-time budget enforced by the supervisor sweep.
    pub max_execution_time: Option<Duration>,
    /// Deepest level this unit may occupy.
    pub max_hierarchy_depth: u32,
    /// Daemon units are reported as such; no other effect.
    pub daemon: bool,
    /// Survive an ancestor's cascade by re-parenting.
    pub keep_alive: bool,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::new(ExecutionMode::Thread)
    }
}

impl ConcurrencyPolicy {
    /// A cascading policy with the default ceilings.
    #[must_use]
    pub const fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            destroy_policy: DestroyPolicy::Cascade,
            max_children: DEFAULT_MAX_CHILDREN_PER_PARENT,
            max_execution_time: None,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            daemon: false,
            keep_alive: false,
        }
    }

    /// Sets the destroy policy.
    #[must_use]
    pub const fn with_destroy_policy(mut self, policy: DestroyPolicy) -> Self {
        self.destroy_policy = policy;
        self
    }

    /// Sets the child ceiling.
    #[must_use]
    pub const fn with_max_children(mut self, n: usize) -> Self {
        self.max_children = n;
        self
    }

    /// Sets the execution-time budget.
    #[must_use]
    pub const fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    /// Sets the depth ceiling.
    #[must_use]
    pub const fn with_max_hierarchy_depth(mut self, depth: u32) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    /// Marks the unit as a daemon.
    #[must_use]
    pub const fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Exempts the unit from ancestor cascade.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}
