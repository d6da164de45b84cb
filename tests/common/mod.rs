//! Shared helpers for integration tests.

#![allow(dead_code)]

pub use rift_governor::test_utils::{governor_with_virtual_clock, init_test_logging};
pub use rift_governor::{assert_with_log, test_complete, test_phase, test_section};

use rift_governor::{ConcurrencyPolicy, ExecutionMode, GovernorConfig};

/// Initializes logging and prints the phase header.
pub fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Default limits with bypass panics disabled.
pub fn quiet_config() -> GovernorConfig {
    GovernorConfig::default().with_strict_bypass_checks(false)
}

/// A cascading cooperative policy.
pub fn simulated() -> ConcurrencyPolicy {
    ConcurrencyPolicy::new(ExecutionMode::Simulated)
}
