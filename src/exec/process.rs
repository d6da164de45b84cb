//! Governed child processes.
//!
//! A child process cannot call back into this process's governor, so the
//! spawner stands in for it: [`ProcessSpawner::reap`] heartbeats on behalf of
//! running children and deregisters exited ones, and
//! [`ProcessSpawner::enforce`] kills children whose unit a destroy policy has
//! signalled or removed. Children of a gracefully draining parent keep
//! running until the drain deadline passes.

use crate::error::{Error, ErrorKind, Result};
use crate::spawn::{ConcurrencyPolicy, ExecutionMode, HierarchyGovernor, UnitState};
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::UnitId;
use parking_lot::Mutex;
use std::process::{Child, Command};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// A child process bound to a unit.
#[derive(Debug)]
pub struct GovernedChild {
    unit: UnitId,
    child: Child,
}

impl GovernedChild {
    /// The child's unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// What one [`ProcessSpawner::reap`] pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Units whose process exited, with the exit code when there is one.
    pub exited: Vec<(UnitId, Option<i32>)>,
    /// Children still running.
    pub running: usize,
}

/// Spawns [`ExecutionMode::Process`] units.
#[derive(Debug)]
pub struct ProcessSpawner {
    governor: Arc<HierarchyGovernor>,
    children: Mutex<Vec<GovernedChild>>,
}

impl ProcessSpawner {
    /// Creates a spawner over `governor`.
    #[must_use]
    pub fn new(governor: Arc<HierarchyGovernor>) -> Self {
        Self {
            governor,
            children: Mutex::new(Vec::new()),
        }
    }

    /// The governing hierarchy.
    #[must_use]
    pub const fn governor(&self) -> &Arc<HierarchyGovernor> {
        &self.governor
    }

    /// Admits and registers a unit, then starts `command` as its process.
    ///
    /// The policy's mode is forced to [`ExecutionMode::Process`]. If the
    /// command fails to start the unit is terminated again and
    /// [`ErrorKind::SpawnFailed`] is returned.
    pub fn spawn(
        &self,
        parent: UnitId,
        policy: ConcurrencyPolicy,
        site: &str,
        mut command: Command,
    ) -> Result<UnitId> {
        let policy = ConcurrencyPolicy {
            mode: ExecutionMode::Process,
            ..policy
        };
        let unit = self.governor.spawn(parent, policy, site)?;
        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                self.governor.bind_process(unit, pid);
                info!(unit = %unit, pid, "governed process started");
                self.children.lock().push(GovernedChild { unit, child });
                Ok(unit)
            }
            Err(e) => {
                if let Err(cleanup) = self.governor.terminate(unit) {
                    debug!(unit = %unit, error = %cleanup, "unit vanished before cleanup");
                }
                Err(Error::new(ErrorKind::SpawnFailed)
                    .with_unit(unit)
                    .with_message(format!("{:?}: {e}", command.get_program())))
            }
        }
    }

    /// Deregisters exited children and heartbeats running ones.
    pub fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let mut children = self.children.lock();
        children.retain_mut(|governed| match governed.child.try_wait() {
            Ok(Some(status)) => {
                if let Err(e) = self.governor.exit(governed.unit) {
                    debug!(unit = %governed.unit, error = %e, "process unit already removed");
                }
                report.exited.push((governed.unit, status.code()));
                false
            }
            Ok(None) => {
                self.governor.heartbeat(governed.unit);
                report.running += 1;
                true
            }
            Err(e) => {
                warn!(unit = %governed.unit, error = %e, "failed to poll governed process");
                true
            }
        });
        report
    }

    /// Kills children whose unit was removed or signalled.
    ///
    /// A signalled child whose parent is still draining inside its graceful
    /// period is left alone; once the drain escalates the unit is removed and
    /// the next pass kills it. Returns the units whose process was killed.
    pub fn enforce(&self) -> Vec<UnitId> {
        let mut killed = Vec::new();
        let mut children = self.children.lock();
        children.retain_mut(|governed| {
            let unit = governed.unit;
            let signalled = self
                .governor
                .termination_flag(unit)
                .is_none_or(|flag| flag.load(Ordering::Acquire));
            if !signalled {
                return true;
            }
            if self.in_grace_period(unit) {
                trace!(unit = %unit, "parent draining, process left running");
                return true;
            }
            if let Err(e) = governed.child.kill() {
                debug!(unit = %unit, error = %e, "kill failed; process may have exited");
            }
            if let Err(e) = governed.child.wait() {
                warn!(unit = %unit, error = %e, "failed to wait on killed process");
            }
            if self.governor.is_registered(unit) {
                if let Err(e) = self.governor.exit(unit) {
                    debug!(unit = %unit, error = %e, "process unit already removed");
                }
            }
            info!(unit = %unit, "governed process killed");
            killed.push(unit);
            false
        });
        killed
    }

    /// True while `unit` is registered under a parent whose drain deadline
    /// has not passed.
    fn in_grace_period(&self, unit: UnitId) -> bool {
        let Some(record) = self.governor.unit(unit) else {
            return false;
        };
        self.governor.unit(record.parent).is_some_and(|parent| {
            parent.state == UnitState::Draining
                && parent
                    .drain_deadline
                    .is_some_and(|deadline| self.governor.now() < deadline)
        })
    }

    /// Children still tracked.
    #[must_use]
    pub fn running(&self) -> usize {
        self.children.lock().len()
    }
}

impl Drop for ProcessSpawner {
    fn drop(&mut self) {
        for mut governed in self.children.get_mut().drain(..) {
            let _ = governed.child.kill();
            let _ = governed.child.wait();
            let _ = self.governor.exit(governed.unit);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::GovernorConfig;
    use crate::spawn::{DestroyPolicy, Supervisor};
    use std::time::{Duration, Instant};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn spawner() -> ProcessSpawner {
        let config = GovernorConfig::default().with_strict_bypass_checks(false);
        ProcessSpawner::new(Arc::new(HierarchyGovernor::new(config)))
    }

    #[test]
    fn exited_process_is_reaped() {
        init_test("exited_process_is_reaped");
        let spawner = spawner();
        let root = spawner.governor().root();
        let unit = spawner
            .spawn(root, ConcurrencyPolicy::default(), "true()", Command::new("true"))
            .unwrap();
        let record = spawner.governor().unit(unit).unwrap();
        assert_eq!(record.policy.mode, ExecutionMode::Process);
        assert_eq!(record.host.parent_process_id, std::process::id());
        assert!(record.host.thread.is_none());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut exited = Vec::new();
        while exited.is_empty() && Instant::now() < deadline {
            exited = spawner.reap().exited;
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(exited, vec![(unit, Some(0))]);
        assert!(!spawner.governor().is_registered(unit));
        assert_eq!(spawner.running(), 0);
        crate::test_complete!("exited_process_is_reaped");
    }

    #[test]
    fn terminated_unit_process_is_killed() {
        init_test("terminated_unit_process_is_killed");
        let spawner = spawner();
        let root = spawner.governor().root();
        let mut sleep = Command::new("sleep");
        sleep.arg("30");
        let unit = spawner
            .spawn(root, ConcurrencyPolicy::default(), "sleep()", sleep)
            .unwrap();
        assert!(spawner.enforce().is_empty());
        assert_eq!(spawner.reap().running, 1);

        spawner.governor().terminate(unit).unwrap();
        assert_eq!(spawner.enforce(), vec![unit]);
        assert_eq!(spawner.running(), 0);
        crate::test_complete!("terminated_unit_process_is_killed");
    }

    #[test]
    fn graceful_parent_spares_process_until_escalation() {
        init_test("graceful_parent_spares_process_until_escalation");
        let config = GovernorConfig::default()
            .with_strict_bypass_checks(false)
            .with_graceful_period(Duration::from_secs(60));
        let (governor, clock) = crate::test_utils::governor_with_virtual_clock(config);
        let governor = Arc::new(governor);
        let spawner = ProcessSpawner::new(Arc::clone(&governor));
        let parent = governor
            .spawn(
                governor.root(),
                ConcurrencyPolicy::default().with_destroy_policy(DestroyPolicy::Graceful),
                "parent()",
            )
            .unwrap();
        let mut sleep = Command::new("sleep");
        sleep.arg("30");
        let child = spawner
            .spawn(parent, ConcurrencyPolicy::default(), "sleep()", sleep)
            .unwrap();

        let report = governor.terminate(parent).unwrap();
        assert!(report.draining);
        assert_eq!(report.signalled, vec![child]);
        assert!(spawner.enforce().is_empty());
        assert_eq!(spawner.running(), 1);
        clock.advance(Duration::from_secs(30));
        assert!(spawner.enforce().is_empty());
        assert!(governor.is_registered(child));

        clock.advance(Duration::from_secs(31));
        let sweep = Supervisor::new(Arc::clone(&governor)).sweep();
        assert_eq!(sweep.escalated, vec![parent]);
        assert!(!governor.is_registered(child));
        assert_eq!(spawner.enforce(), vec![child]);
        assert_eq!(spawner.running(), 0);
        crate::test_complete!("graceful_parent_spares_process_until_escalation");
    }

    #[test]
    fn missing_program_fails_and_deregisters() {
        init_test("missing_program_fails_and_deregisters");
        let spawner = spawner();
        let root = spawner.governor().root();
        let err = spawner
            .spawn(
                root,
                ConcurrencyPolicy::default(),
                "ghost()",
                Command::new("/nonexistent/rift-governor-test-binary"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert_eq!(spawner.governor().active_units(), 0);
        crate::test_complete!("missing_program_fails_and_deregisters");
    }
}
