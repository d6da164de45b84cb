//! Cooperative single-threaded execution.
//!
//! Units run one at a time on the caller's thread and suspend only by
//! returning [`Step::Yield`]. Each time a unit runs, the scheduler heartbeats
//! on its behalf, so a unit that never gets scheduled goes silent and is
//! eventually ghosted by the supervisor.

use crate::error::Result;
use crate::spawn::{ConcurrencyPolicy, ExecutionMode, HierarchyGovernor, TerminationReport};
use crate::tracing_compat::{debug, trace};
use crate::types::UnitId;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::UnitContext;

/// Result of one step of cooperative work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work remains; run again next cycle.
    Yield,
    /// Finished; the unit exits.
    Done,
}

type Work = Box<dyn FnMut(&UnitContext) -> Step>;

struct Task {
    ctx: UnitContext,
    work: Work,
}

/// What one scheduling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Units that ran a step.
    pub ran: usize,
    /// Units that returned [`Step::Done`].
    pub completed: Vec<UnitId>,
    /// Units dropped because they were signalled or removed.
    pub dropped: Vec<UnitId>,
}

/// Round-robin scheduler for [`ExecutionMode::Simulated`] units.
pub struct CooperativeScheduler {
    governor: Arc<HierarchyGovernor>,
    ready: VecDeque<Task>,
}

impl fmt::Debug for CooperativeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeScheduler")
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl CooperativeScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub const fn new(governor: Arc<HierarchyGovernor>) -> Self {
        Self {
            governor,
            ready: VecDeque::new(),
        }
    }

    /// The governing hierarchy.
    #[must_use]
    pub const fn governor(&self) -> &Arc<HierarchyGovernor> {
        &self.governor
    }

    /// Admits, registers, and queues a unit.
    ///
    /// The policy's mode is forced to [`ExecutionMode::Simulated`].
    pub fn spawn<F>(
        &mut self,
        parent: UnitId,
        policy: ConcurrencyPolicy,
        site: &str,
        work: F,
    ) -> Result<UnitId>
    where
        F: FnMut(&UnitContext) -> Step + 'static,
    {
        let policy = ConcurrencyPolicy {
            mode: ExecutionMode::Simulated,
            ..policy
        };
        let unit = self.governor.spawn(parent, policy, site)?;
        self.ready.push_back(Task {
            ctx: UnitContext::new(unit, Arc::clone(&self.governor)),
            work: Box::new(work),
        });
        Ok(unit)
    }

    /// Runs every queued unit once, in FIFO order.
    pub fn schedule_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for _ in 0..self.ready.len() {
            let Some(mut task) = self.ready.pop_front() else {
                break;
            };
            let unit = task.ctx.unit();
            if !self.governor.is_registered(unit) {
                report.dropped.push(unit);
                continue;
            }
            if task.ctx.should_terminate() {
                self.finish(unit);
                report.dropped.push(unit);
                continue;
            }
            task.ctx.heartbeat();
            report.ran += 1;
            match (task.work)(&task.ctx) {
                Step::Yield => self.ready.push_back(task),
                Step::Done => {
                    self.finish(unit);
                    report.completed.push(unit);
                }
            }
        }
        trace!(
            ran = report.ran,
            completed = report.completed.len(),
            dropped = report.dropped.len(),
            "cooperative cycle"
        );
        report
    }

    /// Runs cycles until nothing is queued or `max_cycles` is reached.
    ///
    /// Returns the number of cycles run.
    pub fn run_until_idle(&mut self, max_cycles: usize) -> usize {
        let mut cycles = 0;
        while !self.ready.is_empty() && cycles < max_cycles {
            self.schedule_cycle();
            cycles += 1;
        }
        cycles
    }

    /// Terminates `unit` under its destroy policy and drops removed tasks.
    pub fn terminate(&mut self, unit: UnitId) -> Result<TerminationReport> {
        let report = self.governor.terminate(unit)?;
        let governor = &self.governor;
        self.ready.retain(|task| governor.is_registered(task.ctx.unit()));
        Ok(report)
    }

    /// Queued units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    fn finish(&self, unit: UnitId) {
        if let Err(e) = self.governor.exit(unit) {
            debug!(unit = %unit, error = %e, "cooperative unit already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernorConfig;
    use crate::spawn::DestroyPolicy;
    use std::cell::Cell;
    use std::rc::Rc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn scheduler() -> CooperativeScheduler {
        let config = GovernorConfig::default().with_strict_bypass_checks(false);
        CooperativeScheduler::new(Arc::new(HierarchyGovernor::new(config)))
    }

    #[test]
    fn units_interleave_at_yield_points() {
        init_test("units_interleave_at_yield_points");
        let mut sched = scheduler();
        let root = sched.governor().root();
        let trace = Rc::new(std::cell::RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let trace = Rc::clone(&trace);
            let mut steps = 0;
            sched
                .spawn(root, ConcurrencyPolicy::default(), name, move |_| {
                    trace.borrow_mut().push(format!("{name}{steps}"));
                    steps += 1;
                    if steps == 2 { Step::Done } else { Step::Yield }
                })
                .unwrap();
        }
        assert_eq!(sched.run_until_idle(10), 2);
        assert_eq!(*trace.borrow(), vec!["a0", "b0", "a1", "b1"]);
        assert_eq!(sched.governor().active_units(), 0);
        crate::test_complete!("units_interleave_at_yield_points");
    }

    #[test]
    fn policy_mode_is_forced_to_simulated() {
        init_test("policy_mode_is_forced_to_simulated");
        let mut sched = scheduler();
        let root = sched.governor().root();
        let unit = sched
            .spawn(root, ConcurrencyPolicy::new(ExecutionMode::Process), "w()", |_| {
                Step::Yield
            })
            .unwrap();
        let record = sched.governor().unit(unit).unwrap();
        assert_eq!(record.policy.mode, ExecutionMode::Simulated);
        crate::test_complete!("policy_mode_is_forced_to_simulated");
    }

    #[test]
    fn terminate_cascades_and_drops_tasks() {
        init_test("terminate_cascades_and_drops_tasks");
        let mut sched = scheduler();
        let root = sched.governor().root();
        let parent = sched
            .spawn(root, ConcurrencyPolicy::default(), "parent()", |_| Step::Yield)
            .unwrap();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let child = sched
            .spawn(parent, ConcurrencyPolicy::default(), "child()", move |_| {
                counter.set(counter.get() + 1);
                Step::Yield
            })
            .unwrap();
        sched.schedule_cycle();
        let report = sched.terminate(parent).unwrap();
        assert_eq!(report.terminated, vec![child, parent]);
        assert!(sched.is_empty());
        sched.schedule_cycle();
        assert_eq!(runs.get(), 1);
        crate::test_complete!("terminate_cascades_and_drops_tasks");
    }

    #[test]
    fn signalled_unit_exits_before_running() {
        init_test("signalled_unit_exits_before_running");
        let mut sched = scheduler();
        let root = sched.governor().root();
        let graceful = ConcurrencyPolicy::default().with_destroy_policy(DestroyPolicy::Graceful);
        let parent = sched
            .spawn(root, graceful, "parent()", |_| Step::Yield)
            .unwrap();
        let child = sched
            .spawn(parent, ConcurrencyPolicy::default(), "child()", |ctx| {
                if ctx.should_terminate() { Step::Done } else { Step::Yield }
            })
            .unwrap();
        assert!(sched.terminate(parent).unwrap().draining);

        let cycle = sched.schedule_cycle();
        assert_eq!(cycle.ran, 1);
        assert_eq!(cycle.dropped, vec![child]);
        assert!(!sched.governor().is_registered(child));
        assert!(!sched.governor().is_registered(parent));
        assert_eq!(sched.schedule_cycle().dropped, vec![parent]);
        assert!(sched.is_empty());
        crate::test_complete!("signalled_unit_exits_before_running");
    }
}
