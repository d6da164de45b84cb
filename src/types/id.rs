//! Identifier types for governed entities.
//!
//! Concurrent units, tokens, lock owners, and entanglement groups each get a
//! distinct newtype so they cannot be confused at call sites.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Add;
use std::time::Duration;

/// A unique identifier for a governed concurrent unit (thread, process, or
/// cooperative task).
///
/// Ids are issued monotonically by the telemetry registry and never reused
/// within one registry's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(u64);

impl UnitId {
    /// Sentinel for "no unit". Never issued by a registry.
    pub const NONE: Self = Self(0);

    /// Creates a unit id from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the [`NONE`](Self::NONE) sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

/// Handle to a token stored in a [`TokenTable`](crate::token::TokenTable).
///
/// The slot index may be reused after a token is destroyed; the serial never
/// is, so a handle to a destroyed token is detected as stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId {
    slot: u32,
    serial: u64,
}

impl TokenId {
    #[inline]
    pub(crate) const fn new(slot: u32, serial: u64) -> Self {
        Self { slot, serial }
    }

    /// Returns the arena slot this handle points at.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Returns the construction serial of the token.
    #[inline]
    #[must_use]
    pub const fn serial(self) -> u64 {
        self.serial
    }

    /// Creates a token id for tests that never touch a table.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(slot: u32, serial: u64) -> Self {
        Self { slot, serial }
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({}#{})", self.slot, self.serial)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.serial)
    }
}

/// Logical identity of a lock owner.
///
/// Ownership is compared by value. An owner may be an OS thread, a governed
/// unit, or any logical task id chosen by the caller.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Creates an owner id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Derives an owner id from the calling OS thread.
    #[must_use]
    pub fn current_thread() -> Self {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        // Keep the high bit set so thread-derived owners never collide with
        // small unit-derived ids.
        Self(hasher.finish() | (1 << 63))
    }
}

impl From<UnitId> for OwnerId {
    fn from(unit: UnitId) -> Self {
        Self(unit.as_u64())
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({:#x})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{:#x}", self.0)
    }
}

/// Groups concurrent entanglement links.
///
/// Several ids may coexist on the same token; an id never replaces links
/// made under a different id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntanglementId(pub u32);

impl fmt::Display for EntanglementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A monotonic timestamp in nanoseconds since the governing clock's epoch.
///
/// Production code reads a wall clock; tests drive a manual clock so that
/// heartbeat and grace-period arithmetic is deterministic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// Creates a time from nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a time from seconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns milliseconds since epoch (truncated).
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the elapsed duration since `earlier`, or zero if `earlier` is later.
    #[inline]
    #[must_use]
    pub fn since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        let nanos = rhs.as_nanos().min(u128::from(u64::MAX)) as u64;
        Self(self.0.saturating_add(nanos))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_none_sentinel() {
        assert!(UnitId::NONE.is_none());
        assert!(!UnitId::from_raw(7).is_none());
        assert_eq!(UnitId::from_raw(7).to_string(), "U7");
    }

    #[test]
    fn thread_owner_is_stable_per_thread() {
        let a = OwnerId::current_thread();
        let b = OwnerId::current_thread();
        assert_eq!(a, b);
        let other = std::thread::spawn(OwnerId::current_thread).join().unwrap();
        assert_ne!(a, other);
        assert_ne!(a, OwnerId::from(UnitId::from_raw(1)));
    }

    #[test]
    fn time_arithmetic_saturates() {
        let t = Time::from_millis(5) + Duration::from_millis(10);
        assert_eq!(t.as_millis(), 15);
        assert_eq!(Time::from_secs(1).since(Time::from_secs(3)), Duration::ZERO);
        assert_eq!(
            Time::from_secs(3).since(Time::from_secs(1)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn time_display_scales() {
        assert_eq!(Time::from_nanos(12).to_string(), "12ns");
        assert_eq!(Time::from_millis(3).to_string(), "3ms");
        assert_eq!(Time::from_millis(1500).to_string(), "1.500s");
    }
}
