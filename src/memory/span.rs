//! Memory span descriptors.

use crate::config::SpanConfig;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::registry::SpanLedger;

/// Kind of memory region a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpanKind {
    /// Fixed-size contiguous region.
    Fixed,
    /// One row of a tabular region.
    Row,
    /// Growable contiguous region.
    Continuous,
    /// Backing store for a superposed token's state list.
    Superposed,
    /// Backing store for an entangled token.
    Entangled,
    /// Region shared across execution units.
    Distributed,
}

impl SpanKind {
    /// Returns true for the kinds that back quantum-state bookkeeping.
    #[must_use]
    pub const fn is_quantum(self) -> bool {
        matches!(self, Self::Superposed | Self::Entangled)
    }

    /// Returns the lowercase name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Row => "row",
            Self::Continuous => "continuous",
            Self::Superposed => "superposed",
            Self::Entangled => "entangled",
            Self::Distributed => "distributed",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alignment regime of the registry that creates spans.
///
/// Quantum kinds only get the fine quantum alignment when the regime admits
/// quantum state; in a purely classical regime every span is page-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpanMode {
    /// Classical alignment for every kind.
    Classical,
    /// Quantum alignment for quantum kinds.
    Quantum,
    /// Classical and quantum kinds side by side.
    #[default]
    Hybrid,
}

/// Access rights on a span: bitwise OR of Create/Read/Update/Delete.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessMask(u8);

impl AccessMask {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Create access.
    pub const CREATE: Self = Self(0x01);
    /// Read access.
    pub const READ: Self = Self(0x02);
    /// Update access.
    pub const UPDATE: Self = Self(0x04);
    /// Delete access.
    pub const DELETE: Self = Self(0x08);
    /// Create, read, update, and delete.
    pub const FULL: Self = Self(0x0F);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Creates a mask from raw bits, discarding undefined bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::FULL.0)
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns this mask with `other` removed.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl std::ops::BitOr for AccessMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for AccessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: Self, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "AccessMask({}{}{}{})",
            flag(Self::CREATE, 'c'),
            flag(Self::READ, 'r'),
            flag(Self::UPDATE, 'u'),
            flag(Self::DELETE, 'd')
        )
    }
}

/// Pure alignment predicate: non-zero power of two.
#[inline]
#[must_use]
pub const fn validate_alignment(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Default alignment for `kind` under `mode`.
#[must_use]
pub const fn default_alignment(kind: SpanKind, mode: SpanMode, config: &SpanConfig) -> usize {
    match kind {
        SpanKind::Distributed => config.distributed_alignment,
        SpanKind::Superposed | SpanKind::Entangled => match mode {
            SpanMode::Quantum | SpanMode::Hybrid => config.quantum_alignment,
            SpanMode::Classical => config.classical_alignment,
        },
        SpanKind::Fixed | SpanKind::Row | SpanKind::Continuous => config.classical_alignment,
    }
}

/// Descriptor of a governed memory region.
///
/// A span is owned by exactly one token. Dropping it returns its bytes to the
/// registry that issued it.
pub struct MemorySpan {
    kind: SpanKind,
    bytes: usize,
    alignment: usize,
    /// Whether the region accepts further writes.
    pub open: bool,
    /// Direction flag; true means forward.
    pub direction: bool,
    /// Access rights.
    pub access: AccessMask,
    ledger: Option<Arc<SpanLedger>>,
}

impl MemorySpan {
    pub(crate) fn issued(
        kind: SpanKind,
        bytes: usize,
        alignment: usize,
        ledger: Option<Arc<SpanLedger>>,
    ) -> Self {
        Self {
            kind,
            bytes,
            alignment,
            open: true,
            direction: true,
            access: AccessMask::FULL,
            ledger,
        }
    }

    /// Creates a span that no registry accounts for.
    ///
    /// Uses the default classical/quantum/distributed alignments.
    #[must_use]
    pub fn unaccounted(kind: SpanKind, bytes: usize) -> Self {
        let alignment = default_alignment(kind, SpanMode::Hybrid, &SpanConfig::default());
        Self::issued(kind, bytes, alignment, None)
    }

    /// Returns the span kind.
    #[must_use]
    pub const fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Returns the length in bytes.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the alignment.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Changes the alignment.
    ///
    /// Returns false and leaves the span unchanged when `new_alignment` is zero
    /// or not a power of two.
    pub fn realign(&mut self, new_alignment: usize) -> bool {
        if !validate_alignment(new_alignment) {
            crate::tracing_compat::warn!(
                kind = %self.kind,
                requested = new_alignment,
                current = self.alignment,
                "rejected non-power-of-two alignment"
            );
            return false;
        }
        self.alignment = new_alignment;
        true
    }

    /// Returns true if the access mask grants `required`.
    #[must_use]
    pub const fn permits(&self, required: AccessMask) -> bool {
        self.access.contains(required)
    }
}

impl fmt::Debug for MemorySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySpan")
            .field("kind", &self.kind)
            .field("bytes", &self.bytes)
            .field("alignment", &self.alignment)
            .field("open", &self.open)
            .field("direction", &self.direction)
            .field("access", &self.access)
            .field("accounted", &self.ledger.is_some())
            .finish()
    }
}

impl Drop for MemorySpan {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.release(self.bytes);
        }
    }
}
