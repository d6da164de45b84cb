//! Governed OS threads.
//!
//! The unit is admitted and registered on the spawning thread, before the OS
//! thread exists. The new thread binds its identity to the unit on start and
//! deregisters the unit when the work returns or unwinds.

use crate::error::{Error, ErrorKind, Result};
use crate::spawn::{ConcurrencyPolicy, ExecutionMode, HierarchyGovernor};
use crate::tracing_compat::{debug, error};
use crate::types::UnitId;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::UnitContext;

/// Spawns [`ExecutionMode::Thread`] units.
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
    governor: Arc<HierarchyGovernor>,
}

/// A running governed thread.
#[derive(Debug)]
pub struct GovernedThread<T> {
    unit: UnitId,
    handle: JoinHandle<T>,
}

impl<T> GovernedThread<T> {
    /// The thread's unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// True once the work has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the work. The unit is already deregistered when this returns.
    pub fn join(self) -> std::thread::Result<T> {
        self.handle.join()
    }
}

/// Deregisters the unit when the thread's work ends, including by panic.
struct ExitGuard(UnitContext);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let unit = self.0.unit();
        if std::thread::panicking() {
            error!(unit = %unit, "governed thread panicked");
        }
        if let Err(e) = self.0.governor().exit(unit) {
            debug!(unit = %unit, error = %e, "thread unit already removed");
        }
    }
}

impl ThreadSpawner {
    /// Creates a spawner over `governor`.
    #[must_use]
    pub const fn new(governor: Arc<HierarchyGovernor>) -> Self {
        Self { governor }
    }

    /// The governing hierarchy.
    #[must_use]
    pub const fn governor(&self) -> &Arc<HierarchyGovernor> {
        &self.governor
    }

    /// Admits and registers a unit, then runs `work` on a new OS thread.
    ///
    /// The policy's mode is forced to [`ExecutionMode::Thread`]. If the OS
    /// refuses the thread the unit is terminated again and
    /// [`ErrorKind::SpawnFailed`] is returned.
    pub fn spawn<F, T>(
        &self,
        parent: UnitId,
        policy: ConcurrencyPolicy,
        site: &str,
        work: F,
    ) -> Result<GovernedThread<T>>
    where
        F: FnOnce(&UnitContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let policy = ConcurrencyPolicy {
            mode: ExecutionMode::Thread,
            ..policy
        };
        let unit = self.governor.spawn(parent, policy, site)?;
        let ctx = UnitContext::new(unit, Arc::clone(&self.governor));
        let spawned = std::thread::Builder::new()
            .name(format!("rift-unit-{}", unit.as_u64()))
            .spawn(move || {
                let guard = ExitGuard(ctx);
                guard.0.governor().bind_thread(unit);
                work(&guard.0)
            });
        match spawned {
            Ok(handle) => Ok(GovernedThread { unit, handle }),
            Err(e) => {
                if let Err(cleanup) = self.governor.terminate(unit) {
                    debug!(unit = %unit, error = %cleanup, "unit vanished before cleanup");
                }
                Err(Error::new(ErrorKind::SpawnFailed)
                    .with_unit(unit)
                    .with_message(e.to_string()))
            }
        }
    }
}
