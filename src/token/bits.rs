//! Token validation bitmask.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Monotonic validation facts about a token.
///
/// Each bit is set by a specific operation and only cleared by the operation
/// whose contract says so (collapse clears `SUPERPOSED`, the last disentangle
/// clears `ENTANGLED`, the final unlock clears `LOCKED`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationBits(u8);

impl ValidationBits {
    /// Backing span allocated.
    pub const ALLOCATED: Self = Self(0x01);
    /// Value assigned.
    pub const INITIALIZED: Self = Self(0x02);
    /// Lock held (depth > 0).
    pub const LOCKED: Self = Self(0x04);
    /// Passed governance validation.
    pub const GOVERNED: Self = Self(0x08);
    /// Holds a superposition.
    pub const SUPERPOSED: Self = Self(0x10);
    /// Has at least one entanglement link.
    pub const ENTANGLED: Self = Self(0x20);
    /// Reserved; stored only.
    pub const PERSISTENT: Self = Self(0x40);
    /// Reserved; stored only.
    pub const SHADOW: Self = Self(0x80);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::ALLOCATED, "ALLOCATED"),
        (Self::INITIALIZED, "INITIALIZED"),
        (Self::LOCKED, "LOCKED"),
        (Self::GOVERNED, "GOVERNED"),
        (Self::SUPERPOSED, "SUPERPOSED"),
        (Self::ENTANGLED, "ENTANGLED"),
        (Self::PERSISTENT, "PERSISTENT"),
        (Self::SHADOW, "SHADOW"),
    ];

    /// No bits set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns the union.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ValidationBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ValidationBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidationBits(")?;
        let mut first = true;
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let mut bits = ValidationBits::empty();
        bits.insert(ValidationBits::ALLOCATED | ValidationBits::GOVERNED);
        assert!(bits.contains(ValidationBits::ALLOCATED));
        assert!(!bits.contains(ValidationBits::ALLOCATED | ValidationBits::INITIALIZED));
        bits.remove(ValidationBits::GOVERNED);
        assert_eq!(bits.bits(), 0x01);
        assert_eq!(format!("{bits:?}"), "ValidationBits(ALLOCATED)");
    }
}
