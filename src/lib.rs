//! Rift governor: governed token lifecycle and concurrency-hierarchy engine.
//!
//! # Overview
//!
//! Two coupled halves. The token half governs units of computation state: a
//! [`Token`] couples a [`MemorySpan`], a [`TokenType`], and a [`TokenValue`],
//! carries [`ValidationBits`] that record which governance steps it passed,
//! owns a reentrant [`LockContext`], and may hold a superposition of
//! alternative states or entanglement links to other tokens. The spawn half
//! governs concurrent units: every thread, process, or cooperative task is
//! admitted by the [`HierarchyGovernor`] against per-parent, depth, and global
//! ceilings, registered with telemetry, and watched for missed heartbeats.
//!
//! # Core Guarantees
//!
//! - **Governed before valid**: `Governed` is never set without `Allocated`
//!   and a power-of-two span alignment
//! - **Exclusive, reentrant locks**: one owner at a time; the `Locked` bit
//!   flips only at depth 0 ↔ 1
//! - **Symmetric entanglement**: every link is recorded on both tokens and
//!   torn down on both when either side is destroyed
//! - **No unadmitted units**: registration consumes a [`spawn::SpawnPermit`]
//!   that only admission issues
//! - **No silent ghosts**: units that stop heartbeating are reclaimed under
//!   their destroy policy and logged with full lineage
//!
//! # Module Structure
//!
//! - [`types`]: identifiers and the logical time stamp
//! - [`error`](mod@error): error kinds, categories, recoverability
//! - [`config`]: governor and span configuration, env and TOML overrides
//! - [`time`]: wall and virtual time sources
//! - [`memory`]: span descriptors and the accounting span registry
//! - [`token`]: tokens, validation bits, lock contexts, the token table
//! - [`quantum`]: superposition, collapse, measurement, entanglement
//! - [`spawn`]: policies, telemetry, hierarchy, governor, supervisor, event log
//! - [`exec`]: cooperative, threaded, and process execution modes
//! - [`observability`]: governance counters
//! - [`tracing_compat`]: optional tracing integration
//!
//! # Example
//!
//! ```
//! use rift_governor::{OwnerId, SpanKind, TokenTable, TokenType};
//!
//! let mut tokens = TokenTable::default();
//! let t = tokens.construct(TokenType::Int, SpanKind::Fixed, 4096).unwrap();
//! assert!(tokens.validate(t).unwrap());
//! tokens.assign(t, 42).unwrap();
//! assert!(tokens.is_valid(t).unwrap());
//!
//! let owner = OwnerId::new(1);
//! tokens.lock(t, owner).unwrap();
//! tokens.unlock(t, owner).unwrap();
//! tokens.destroy(t, owner).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod error;
pub mod exec;
pub mod memory;
pub mod observability;
pub mod quantum;
pub mod spawn;
pub mod time;
pub mod token;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::{GovernorConfig, SpanConfig};
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use exec::{CooperativeScheduler, ProcessSpawner, Step, ThreadSpawner, UnitContext};
pub use memory::{AccessMask, MemorySpan, SpanKind, SpanRegistry};
pub use observability::GovernanceAccounting;
pub use quantum::{QuantumState, Superposition};
pub use spawn::{
    ConcurrencyPolicy, DestroyPolicy, ExecutionMode, HierarchyGovernor, Supervisor,
    TerminationCause,
};
pub use time::{TimeSource, VirtualClock, WallClock};
pub use token::{LockContext, SourceLocation, Token, TokenTable, TokenType, TokenValue, ValidationBits};
pub use types::{EntanglementId, OwnerId, Time, TokenId, UnitId};
