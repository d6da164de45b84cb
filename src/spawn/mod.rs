//! Concurrency governance: spawn admission, telemetry, hierarchy, liveness.
//!
//! Every concurrent unit is admitted by the [`HierarchyGovernor`] before it
//! starts, registered in the [`TelemetryRegistry`], linked under its parent in
//! the [`HierarchyTable`], and then expected to heartbeat. A [`Supervisor`]
//! sweep reclaims units that go silent, overrun their budget, or lose their
//! parent, applying the [`DestroyPolicy`] each unit was admitted with.
//!
//! ```
//! use rift_governor::config::GovernorConfig;
//! use rift_governor::spawn::{ConcurrencyPolicy, ExecutionMode, HierarchyGovernor};
//!
//! let governor = HierarchyGovernor::new(GovernorConfig::default());
//! let policy = ConcurrencyPolicy::new(ExecutionMode::Thread);
//! assert!(governor.validate_spawn(governor.root(), &policy));
//!
//! let unit = governor.spawn(governor.root(), policy, "worker()").unwrap();
//! assert!(governor.heartbeat(unit));
//! assert_eq!(governor.lineage(unit), vec![governor.root()]);
//! ```

pub mod event_log;
pub mod governor;
pub mod hierarchy;
pub mod liveness;
pub mod policy;
pub mod report;
pub mod telemetry;

pub use event_log::{
    EventRecord, EventSink, GovernanceEvent, JsonLinesSink, MemorySink, read_json_lines,
};
pub use governor::{
    HierarchyGovernor, RejectionReason, SpawnPermit, SpawnRejection, TerminationCause,
    TerminationReport,
};
pub use hierarchy::{ChildLink, HierarchyNode, HierarchyTable, IMPLICIT_NODE_SITE};
pub use liveness::{Supervisor, SweepHandle, SweepReport};
pub use policy::{ConcurrencyPolicy, DestroyPolicy, ExecutionMode};
pub use report::TelemetryReport;
pub use telemetry::{
    HostIdentity, Registration, TelemetryRegistry, TransitionError, UnitRecord, UnitState,
};
