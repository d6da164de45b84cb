//! Fixed-capacity spawn telemetry registry.
//!
//! Entries live in a slot table guarded by a readers-writer lock: heartbeats
//! and queries take the read lock and touch only atomics, while registration
//! and removal take the write lock. Unit ids come from a separate counter
//! lock so issuing an id never waits on registry readers or writers.

use crate::error::{Error, ErrorKind, Result};
use crate::types::{Time, UnitId};
use core::fmt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::policy::ConcurrencyPolicy;

/// Lifecycle of a governed unit.
///
/// ```text
/// Requested ─► Validated ─► Registered ─┬─► Terminated ─► Reaped
///                                       └─► Draining ─► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Spawn requested, not yet checked.
    Requested,
    /// Passed the hierarchy gate.
    Validated,
    /// Present in the registry, heartbeating.
    Registered,
    /// Graceful termination in progress; children signalled.
    Draining,
    /// Terminated; entry about to be removed.
    Terminated,
    /// Removed from the registry.
    Reaped,
}

impl UnitState {
    /// Returns the uppercase name used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Validated => "VALIDATED",
            Self::Registered => "REGISTERED",
            Self::Draining => "DRAINING",
            Self::Terminated => "TERMINATED",
            Self::Reaped => "REAPED",
        }
    }

    /// Checks and performs a lifecycle transition.
    pub fn transition(self, to: Self) -> core::result::Result<Self, TransitionError> {
        let legal = matches!(
            (self, to),
            (Self::Requested, Self::Validated)
                | (Self::Validated, Self::Registered)
                | (Self::Registered, Self::Draining | Self::Terminated)
                | (Self::Draining, Self::Terminated)
                | (Self::Terminated, Self::Reaped)
        );
        if legal {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    /// True while the unit is registered and running or draining.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Registered | Self::Draining)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An illegal unit lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal unit transition {from} -> {to}")]
pub struct TransitionError {
    /// State before.
    pub from: UnitState,
    /// Rejected target state.
    pub to: UnitState,
}

/// Identity of the OS entity backing a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostIdentity {
    /// Process id of the unit.
    pub process_id: u32,
    /// Process id of the unit's parent.
    pub parent_process_id: u32,
    /// Thread label, when the unit is a thread.
    pub thread: Option<String>,
}

impl HostIdentity {
    /// Identity of the calling thread in this process.
    #[must_use]
    pub fn current_thread() -> Self {
        let current = std::thread::current();
        let label = current.name().map_or_else(
            || format!("{:?}", current.id()),
            ToString::to_string,
        );
        Self {
            process_id: std::process::id(),
            parent_process_id: std::process::id(),
            thread: Some(label),
        }
    }
}

/// Data captured when a unit is registered.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Parent unit.
    pub parent: UnitId,
    /// Hierarchy depth (root is 0).
    pub depth: u32,
    /// Spawn-site label.
    pub site: String,
    /// Registration time.
    pub spawn_time: Time,
    /// Host identity at registration.
    pub host: HostIdentity,
    /// Policy the unit was admitted under.
    pub policy: ConcurrencyPolicy,
}

/// Point-in-time copy of a telemetry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unit id.
    pub unit: UnitId,
    /// Parent unit id.
    pub parent: UnitId,
    /// Host identity.
    pub host: HostIdentity,
    /// Spawn time.
    pub spawn_time: Time,
    /// Last recorded heartbeat.
    pub last_heartbeat: Time,
    /// Spawn-site label.
    pub site: String,
    /// Hierarchy depth.
    pub depth: u32,
    /// Live children.
    pub child_count: usize,
    /// Daemon flag from the policy.
    pub daemon: bool,
    /// Admitted policy.
    pub policy: ConcurrencyPolicy,
    /// Lifecycle state.
    pub state: UnitState,
    /// Graceful drain deadline, while draining.
    pub drain_deadline: Option<Time>,
}

#[derive(Debug)]
struct Entry {
    unit: UnitId,
    parent: UnitId,
    host: HostIdentity,
    spawn_time: Time,
    site: String,
    depth: u32,
    policy: ConcurrencyPolicy,
    state: UnitState,
    drain_deadline: Option<Time>,
    last_heartbeat: AtomicU64,
    child_count: AtomicUsize,
    terminate: Arc<AtomicBool>,
}

impl Entry {
    fn new(unit: UnitId, registration: Registration) -> (Self, Arc<AtomicBool>) {
        let terminate = Arc::new(AtomicBool::new(false));
        let entry = Self {
            unit,
            parent: registration.parent,
            host: registration.host,
            spawn_time: registration.spawn_time,
            site: registration.site,
            depth: registration.depth,
            policy: registration.policy,
            state: UnitState::Registered,
            drain_deadline: None,
            last_heartbeat: AtomicU64::new(registration.spawn_time.as_nanos()),
            child_count: AtomicUsize::new(0),
            terminate: Arc::clone(&terminate),
        };
        (entry, terminate)
    }

    fn record(&self) -> UnitRecord {
        UnitRecord {
            unit: self.unit,
            parent: self.parent,
            host: self.host.clone(),
            spawn_time: self.spawn_time,
            last_heartbeat: Time::from_nanos(self.last_heartbeat.load(Ordering::Acquire)),
            site: self.site.clone(),
            depth: self.depth,
            child_count: self.child_count.load(Ordering::Acquire),
            daemon: self.policy.daemon,
            policy: self.policy.clone(),
            state: self.state,
            drain_deadline: self.drain_deadline,
        }
    }
}

/// Mutable view of an entry handed to [`TelemetryRegistry::update`].
#[derive(Debug)]
pub(crate) struct EntryMut<'a> {
    pub parent: &'a mut UnitId,
    pub depth: &'a mut u32,
    pub host: &'a mut HostIdentity,
    pub state: &'a mut UnitState,
    pub drain_deadline: &'a mut Option<Time>,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Option<Entry>>,
    index: HashMap<UnitId, usize>,
}

/// Bounded table of live governed units.
#[derive(Debug)]
pub struct TelemetryRegistry {
    slots: RwLock<Slots>,
    next_id: Mutex<u64>,
    capacity: usize,
}

impl TelemetryRegistry {
    /// Creates a registry holding at most `capacity` units.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            slots: RwLock::new(Slots {
                entries,
                index: HashMap::with_capacity(capacity),
            }),
            next_id: Mutex::new(1),
            capacity,
        }
    }

    /// Creates a registry whose first slot holds `root`.
    ///
    /// The capacity is raised to one if zero so the root always fits.
    pub(crate) fn with_root(capacity: usize, root: Registration) -> (Self, UnitId) {
        let mut registry = Self::new(capacity.max(1));
        let unit = registry.issue_id();
        let (entry, _) = Entry::new(unit, root);
        let slots = registry.slots.get_mut();
        slots.entries[0] = Some(entry);
        slots.index.insert(unit, 0);
        (registry, unit)
    }

    /// Maximum concurrently tracked units.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn issue_id(&self) -> UnitId {
        let mut next = self.next_id.lock();
        let id = UnitId::from_raw(*next);
        *next += 1;
        id
    }

    /// Registers a unit in the first free slot.
    ///
    /// Fails with [`ErrorKind::RegistryFull`] when no slot is free.
    pub fn insert(&self, registration: Registration) -> Result<(UnitId, Arc<AtomicBool>)> {
        let unit = self.issue_id();
        let mut slots = self.slots.write();
        let Some(free) = slots.entries.iter().position(Option::is_none) else {
            return Err(Error::new(ErrorKind::RegistryFull)
                .with_unit(unit)
                .with_message(format!("all {} slots in use", self.capacity)));
        };
        let (entry, terminate) = Entry::new(unit, registration);
        slots.entries[free] = Some(entry);
        slots.index.insert(unit, free);
        drop(slots);
        Ok((unit, terminate))
    }

    /// Removes a unit, returning its final record with state `Reaped`.
    pub fn remove(&self, unit: UnitId) -> Option<UnitRecord> {
        let mut slots = self.slots.write();
        let slot = slots.index.remove(&unit)?;
        let entry = slots.entries[slot].take()?;
        drop(slots);
        entry.terminate.store(true, Ordering::Release);
        let mut record = entry.record();
        record.state = UnitState::Reaped;
        Some(record)
    }

    /// Records a heartbeat at `now`. Returns false for unknown units.
    pub fn heartbeat(&self, unit: UnitId, now: Time) -> bool {
        self.with_entry(unit, |entry| {
            entry.last_heartbeat.fetch_max(now.as_nanos(), Ordering::AcqRel);
        })
        .is_some()
    }

    /// Adjusts a unit's live child count.
    pub(crate) fn adjust_children(&self, unit: UnitId, delta: isize) {
        let _ = self.with_entry(unit, |entry| {
            if delta >= 0 {
                entry
                    .child_count
                    .fetch_add(delta.unsigned_abs(), Ordering::AcqRel);
            } else {
                let _ = entry
                    .child_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        Some(n.saturating_sub(delta.unsigned_abs()))
                    });
            }
        });
    }

    /// Sets a unit's live child count.
    pub(crate) fn set_children(&self, unit: UnitId, count: usize) {
        let _ = self.with_entry(unit, |entry| entry.child_count.store(count, Ordering::Release));
    }

    /// Raises the unit's termination signal.
    pub fn signal(&self, unit: UnitId) -> bool {
        self.with_entry(unit, |entry| entry.terminate.store(true, Ordering::Release))
            .is_some()
    }

    /// Returns the unit's termination flag.
    #[must_use]
    pub fn termination_flag(&self, unit: UnitId) -> Option<Arc<AtomicBool>> {
        self.with_entry(unit, |entry| Arc::clone(&entry.terminate))
    }

    /// Mutates structural fields under the write lock.
    pub(crate) fn update<R>(&self, unit: UnitId, f: impl FnOnce(EntryMut<'_>) -> R) -> Option<R> {
        let mut slots = self.slots.write();
        let slot = *slots.index.get(&unit)?;
        let entry = slots.entries[slot].as_mut()?;
        Some(f(EntryMut {
            parent: &mut entry.parent,
            depth: &mut entry.depth,
            host: &mut entry.host,
            state: &mut entry.state,
            drain_deadline: &mut entry.drain_deadline,
        }))
    }

    fn with_entry<R>(&self, unit: UnitId, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let slots = self.slots.read();
        let slot = *slots.index.get(&unit)?;
        slots.entries[slot].as_ref().map(f)
    }

    /// Snapshot of one unit.
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<UnitRecord> {
        self.with_entry(unit, Entry::record)
    }

    /// True if the unit is registered.
    #[must_use]
    pub fn contains(&self, unit: UnitId) -> bool {
        self.slots.read().index.contains_key(&unit)
    }

    /// Number of registered units.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.read().index.len()
    }

    /// Snapshot of all registered units in slot order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UnitRecord> {
        self.slots
            .read()
            .entries
            .iter()
            .flatten()
            .map(Entry::record)
            .collect()
    }
}
