//! Governance accounting.
//!
//! Monotone counters for spawn admission, termination causes, liveness, and
//! token validation, plus live gauges with high-water marks. All counters are
//! relaxed atomics; nothing here takes a lock.
//!
//! ```
//! use rift_governor::observability::GovernanceAccounting;
//! use rift_governor::spawn::RejectionReason;
//!
//! let accounting = GovernanceAccounting::new();
//! accounting.spawn_admitted();
//! accounting.spawn_rejected(RejectionReason::ChildLimit);
//! assert_eq!(accounting.rejections_by_reason(RejectionReason::ChildLimit), 1);
//!
//! accounting.validation_passed();
//! assert!(accounting.meets_threshold());
//! ```

use crate::spawn::{RejectionReason, TerminationCause};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Validation ratio at or above which a token population counts as governed.
pub const VALIDATION_THRESHOLD: f64 = 0.85;

const REASON_COUNT: usize = RejectionReason::ALL.len();
const CAUSE_COUNT: usize = TerminationCause::ALL.len();

/// Counters shared by the governor, token tables, and supervisor.
#[derive(Debug)]
pub struct GovernanceAccounting {
    // === Spawn admission ===
    admitted: AtomicU64,
    rejections: [AtomicU64; REASON_COUNT],
    bypasses: AtomicU64,

    // === Unit lifecycle ===
    terminations: [AtomicU64; CAUSE_COUNT],
    live_units: AtomicI64,
    units_peak: AtomicI64,
    heartbeats: AtomicU64,
    ghosts: AtomicU64,
    reparented: AtomicU64,

    // === Tokens ===
    validations_passed: AtomicU64,
    validations_failed: AtomicU64,
    live_tokens: AtomicI64,
    tokens_peak: AtomicI64,
    lock_contentions: AtomicU64,
    violations: AtomicU64,
}

impl Default for GovernanceAccounting {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernanceAccounting {
    /// Creates accounting with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            rejections: std::array::from_fn(|_| AtomicU64::new(0)),
            bypasses: AtomicU64::new(0),
            terminations: std::array::from_fn(|_| AtomicU64::new(0)),
            live_units: AtomicI64::new(0),
            units_peak: AtomicI64::new(0),
            heartbeats: AtomicU64::new(0),
            ghosts: AtomicU64::new(0),
            reparented: AtomicU64::new(0),
            validations_passed: AtomicU64::new(0),
            validations_failed: AtomicU64::new(0),
            live_tokens: AtomicI64::new(0),
            tokens_peak: AtomicI64::new(0),
            lock_contentions: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    // ================================================================
    // Spawn admission
    // ================================================================

    /// Record an admitted spawn.
    pub fn spawn_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected spawn.
    pub fn spawn_rejected(&self, reason: RejectionReason) {
        self.rejections[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a registration that found the registry full despite a permit.
    pub fn registry_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Admitted spawns.
    #[must_use]
    pub fn spawns_admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Rejections for one reason.
    #[must_use]
    pub fn rejections_by_reason(&self, reason: RejectionReason) -> u64 {
        self.rejections[reason.index()].load(Ordering::Relaxed)
    }

    /// Rejections across all reasons.
    #[must_use]
    pub fn spawns_rejected(&self) -> u64 {
        self.rejections
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Registry bypasses observed.
    #[must_use]
    pub fn registry_bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }

    // ================================================================
    // Unit lifecycle
    // ================================================================

    /// Record a registration.
    pub fn unit_registered(&self) {
        let live = self.live_units.fetch_add(1, Ordering::Relaxed) + 1;
        update_peak(&self.units_peak, live);
    }

    /// Record a removal from the registry.
    pub fn unit_terminated(&self, cause: TerminationCause) {
        self.terminations[cause.index()].fetch_add(1, Ordering::Relaxed);
        self.live_units.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a heartbeat.
    pub fn heartbeat_recorded(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a ghosted unit.
    pub fn ghost_detected(&self) {
        self.ghosts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a re-parenting.
    pub fn unit_reparented(&self) {
        self.reparented.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminations for one cause.
    #[must_use]
    pub fn terminations_by_cause(&self, cause: TerminationCause) -> u64 {
        self.terminations[cause.index()].load(Ordering::Relaxed)
    }

    /// Terminations across all causes.
    #[must_use]
    pub fn terminations_total(&self) -> u64 {
        self.terminations
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Units currently registered, as seen by accounting.
    #[must_use]
    pub fn live_units(&self) -> i64 {
        self.live_units.load(Ordering::Relaxed)
    }

    /// Highest simultaneous live units.
    #[must_use]
    pub fn units_peak(&self) -> i64 {
        self.units_peak.load(Ordering::Relaxed)
    }

    /// Heartbeats recorded.
    #[must_use]
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Ghosted units detected.
    #[must_use]
    pub fn ghosts_detected(&self) -> u64 {
        self.ghosts.load(Ordering::Relaxed)
    }

    /// Units moved under a new parent.
    #[must_use]
    pub fn reparented(&self) -> u64 {
        self.reparented.load(Ordering::Relaxed)
    }

    // ================================================================
    // Tokens
    // ================================================================

    /// Record a token construction.
    pub fn token_constructed(&self) {
        let live = self.live_tokens.fetch_add(1, Ordering::Relaxed) + 1;
        update_peak(&self.tokens_peak, live);
    }

    /// Record a token destruction.
    pub fn token_destroyed(&self) {
        self.live_tokens.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a passed validation.
    pub fn validation_passed(&self) {
        self.validations_passed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed validation.
    pub fn validation_failed(&self) {
        self.validations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock request that found another owner.
    pub fn lock_contended(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a governance violation.
    pub fn governance_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Live tokens.
    #[must_use]
    pub fn live_tokens(&self) -> i64 {
        self.live_tokens.load(Ordering::Relaxed)
    }

    /// Highest simultaneous live tokens.
    #[must_use]
    pub fn tokens_peak(&self) -> i64 {
        self.tokens_peak.load(Ordering::Relaxed)
    }

    /// Validations passed.
    #[must_use]
    pub fn validations_passed(&self) -> u64 {
        self.validations_passed.load(Ordering::Relaxed)
    }

    /// Validations failed.
    #[must_use]
    pub fn validations_failed(&self) -> u64 {
        self.validations_failed.load(Ordering::Relaxed)
    }

    /// Fraction of validations that passed; 1.0 before any validation.
    #[must_use]
    pub fn validation_ratio(&self) -> f64 {
        let passed = self.validations_passed();
        let total = passed + self.validations_failed();
        if total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = passed as f64 / total as f64;
        ratio
    }

    /// True when the ratio meets [`VALIDATION_THRESHOLD`].
    #[must_use]
    pub fn meets_threshold(&self) -> bool {
        self.validation_ratio() >= VALIDATION_THRESHOLD
    }

    /// Lock contentions observed.
    #[must_use]
    pub fn lock_contentions(&self) -> u64 {
        self.lock_contentions.load(Ordering::Relaxed)
    }

    /// Governance violations observed, bypasses included.
    #[must_use]
    pub fn governance_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    // ================================================================
    // Snapshot
    // ================================================================

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            spawns_admitted: self.spawns_admitted(),
            rejections: RejectionReason::ALL
                .iter()
                .map(|&r| (r, self.rejections_by_reason(r)))
                .collect(),
            registry_bypasses: self.registry_bypasses(),
            terminations: TerminationCause::ALL
                .iter()
                .map(|&c| (c, self.terminations_by_cause(c)))
                .collect(),
            live_units: self.live_units(),
            units_peak: self.units_peak(),
            heartbeats: self.heartbeats(),
            ghosts_detected: self.ghosts_detected(),
            reparented: self.reparented(),
            live_tokens: self.live_tokens(),
            tokens_peak: self.tokens_peak(),
            validations_passed: self.validations_passed(),
            validations_failed: self.validations_failed(),
            validation_ratio: self.validation_ratio(),
            lock_contentions: self.lock_contentions(),
            governance_violations: self.governance_violations(),
        }
    }
}

fn update_peak(peak: &AtomicI64, new_value: i64) {
    let mut current = peak.load(Ordering::Relaxed);
    while new_value > current {
        match peak.compare_exchange_weak(current, new_value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(v) => current = v,
        }
    }
}

/// Point-in-time copy of [`GovernanceAccounting`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingSnapshot {
    /// Admitted spawns.
    pub spawns_admitted: u64,
    /// Rejections per reason.
    pub rejections: Vec<(RejectionReason, u64)>,
    /// Registry bypasses.
    pub registry_bypasses: u64,
    /// Terminations per cause.
    pub terminations: Vec<(TerminationCause, u64)>,
    /// Live units.
    pub live_units: i64,
    /// Peak live units.
    pub units_peak: i64,
    /// Heartbeats.
    pub heartbeats: u64,
    /// Ghosted units.
    pub ghosts_detected: u64,
    /// Re-parented units.
    pub reparented: u64,
    /// Live tokens.
    pub live_tokens: i64,
    /// Peak live tokens.
    pub tokens_peak: i64,
    /// Validations passed.
    pub validations_passed: u64,
    /// Validations failed.
    pub validations_failed: u64,
    /// Pass ratio.
    pub validation_ratio: f64,
    /// Lock contentions.
    pub lock_contentions: u64,
    /// Governance violations.
    pub governance_violations: u64,
}
