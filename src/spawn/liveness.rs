//! Anti-ghosting supervisor.
//!
//! A sweep runs five passes in order:
//!
//! 1. escalate graceful drains past their deadline to `Cascade`
//! 2. terminate ghosted units (silent longer than the ghost window) under
//!    their own destroy policy
//! 3. terminate units past `max_execution_time` under their own policy
//! 4. cascade orphans whose parent is no longer registered
//! 5. relink registered units missing from their parent's hierarchy node
//!
//! The root sentinel is never ghosted, timed out, or reaped.

use crate::spawn::telemetry::{UnitRecord, UnitState};
use crate::tracing_compat::{debug, warn};
use crate::types::UnitId;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::event_log::GovernanceEvent;
use super::governor::{HierarchyGovernor, TerminationCause};
use super::policy::DestroyPolicy;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Drains escalated to cascade.
    pub escalated: Vec<UnitId>,
    /// Units found ghosted.
    pub ghosted: Vec<UnitId>,
    /// Units past their execution-time budget.
    pub timed_out: Vec<UnitId>,
    /// Orphans reaped.
    pub orphans_reaped: Vec<UnitId>,
    /// Units relinked under their parent.
    pub reconciled: Vec<UnitId>,
    /// Every unit removed from the registry by this sweep.
    pub terminated: Vec<UnitId>,
}

impl SweepReport {
    /// True if the sweep changed nothing.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.escalated.is_empty()
            && self.ghosted.is_empty()
            && self.timed_out.is_empty()
            && self.orphans_reaped.is_empty()
            && self.reconciled.is_empty()
            && self.terminated.is_empty()
    }
}

/// Sweeps a governor for unresponsive, overrunning, and orphaned units.
#[derive(Debug, Clone)]
pub struct Supervisor {
    governor: Arc<HierarchyGovernor>,
}

impl Supervisor {
    /// Creates a supervisor over `governor`.
    #[must_use]
    pub const fn new(governor: Arc<HierarchyGovernor>) -> Self {
        Self { governor }
    }

    /// The supervised governor.
    #[must_use]
    pub const fn governor(&self) -> &Arc<HierarchyGovernor> {
        &self.governor
    }

    /// Units currently silent for longer than the ghost window.
    ///
    /// Detection only; nothing is terminated.
    #[must_use]
    pub fn ghosted_units(&self) -> Vec<UnitId> {
        let now = self.governor.now();
        let window = self.governor.config().ghost_window();
        self.candidates()
            .into_iter()
            .filter(|r| r.state == UnitState::Registered && now.since(r.last_heartbeat) > window)
            .map(|r| r.unit)
            .collect()
    }

    /// Runs one sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.escalate_drains(&mut report);
        self.reclaim_ghosts(&mut report);
        self.enforce_execution_time(&mut report);
        self.reap_orphans(&mut report);
        self.reconcile(&mut report);
        if !report.is_quiet() {
            debug!(
                ghosted = report.ghosted.len(),
                timed_out = report.timed_out.len(),
                orphans = report.orphans_reaped.len(),
                terminated = report.terminated.len(),
                "sweep complete"
            );
        }
        report
    }

    /// Non-root units, shallowest first so a parent is handled before its
    /// children.
    fn candidates(&self) -> Vec<UnitRecord> {
        let root = self.governor.root();
        let mut records: Vec<UnitRecord> = self
            .governor
            .registry_dump()
            .into_iter()
            .filter(|r| r.unit != root)
            .collect();
        records.sort_by_key(|r| (r.depth, r.unit));
        records
    }

    fn apply(
        &self,
        unit: UnitId,
        cause: TerminationCause,
        policy: Option<DestroyPolicy>,
        report: &mut SweepReport,
    ) -> bool {
        match self.governor.terminate_inner(unit, cause, policy) {
            Ok(outcome) => {
                report.terminated.extend(outcome.terminated);
                true
            }
            Err(e) => {
                debug!(unit = %unit, error = %e, "sweep target already gone");
                false
            }
        }
    }

    fn escalate_drains(&self, report: &mut SweepReport) {
        let now = self.governor.now();
        for record in self.candidates() {
            let expired = record.state == UnitState::Draining
                && record.drain_deadline.is_some_and(|deadline| deadline <= now);
            if !expired || !self.governor.is_registered(record.unit) {
                continue;
            }
            warn!(unit = %record.unit, "graceful drain expired, cascading");
            if self.apply(record.unit, TerminationCause::GracefulExpired, None, report) {
                report.escalated.push(record.unit);
            }
        }
    }

    fn reclaim_ghosts(&self, report: &mut SweepReport) {
        let now = self.governor.now();
        let window = self.governor.config().ghost_window();
        for record in self.candidates() {
            if record.state != UnitState::Registered || !self.governor.is_registered(record.unit) {
                continue;
            }
            let silent = now.since(record.last_heartbeat);
            if silent <= window {
                continue;
            }
            let unit = record.unit;
            let lineage = self.governor.lineage(unit);
            warn!(
                unit = %unit,
                lineage = ?lineage,
                site = %record.site,
                silent_ms = u64::try_from(silent.as_millis()).unwrap_or(u64::MAX),
                policy = %record.policy.destroy_policy,
                "unit ghosted"
            );
            self.governor.accounting().ghost_detected();
            self.governor
                .emit(|| GovernanceEvent::Ghosted { unit, lineage });
            report.ghosted.push(unit);
            self.apply(unit, TerminationCause::Ghosted, None, report);
        }
    }

    fn enforce_execution_time(&self, report: &mut SweepReport) {
        let now = self.governor.now();
        for record in self.candidates() {
            let Some(limit) = record.policy.max_execution_time else {
                continue;
            };
            if record.state != UnitState::Registered
                || now.since(record.spawn_time) <= limit
                || !self.governor.is_registered(record.unit)
            {
                continue;
            }
            warn!(
                unit = %record.unit,
                limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "execution time exceeded"
            );
            if self.apply(record.unit, TerminationCause::Timeout, None, report) {
                report.timed_out.push(record.unit);
            }
        }
    }

    fn reap_orphans(&self, report: &mut SweepReport) {
        for record in self.candidates() {
            if self.governor.is_registered(record.parent) || !self.governor.is_registered(record.unit) {
                continue;
            }
            warn!(unit = %record.unit, parent = %record.parent, "reaping orphan");
            if self.apply(
                record.unit,
                TerminationCause::Orphaned,
                Some(DestroyPolicy::Cascade),
                report,
            ) {
                report.orphans_reaped.push(record.unit);
            }
        }
    }

    fn reconcile(&self, report: &mut SweepReport) {
        let hierarchy = self.governor.hierarchy();
        for record in self.candidates() {
            if !self.governor.is_registered(record.parent)
                || hierarchy.is_child(record.parent, record.unit)
            {
                continue;
            }
            if self
                .governor
                .add_child(record.parent, record.unit, &record.site)
            {
                debug!(unit = %record.unit, parent = %record.parent, "relinked unit");
                report.reconciled.push(record.unit);
            }
        }
    }
}

/// Runs [`Supervisor::sweep`] periodically on a background thread.
///
/// Dropping the handle stops the thread.
#[derive(Debug)]
pub struct SweepHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<u64>>,
}

impl SweepHandle {
    /// Starts sweeping every `period`.
    pub fn spawn(supervisor: Supervisor, period: Duration) -> io::Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("rift-supervisor".into())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                let mut sweeps = 0_u64;
                let mut stopped = lock.lock();
                loop {
                    if *stopped {
                        break;
                    }
                    cvar.wait_for(&mut stopped, period);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    supervisor.sweep();
                    sweeps += 1;
                    stopped = lock.lock();
                }
                sweeps
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stops the thread and returns how many sweeps it ran.
    #[must_use]
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}
