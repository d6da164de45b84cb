//! Governed tokens.
//!
//! A [`Token`] is the triplet (memory span, type, value) plus a validation
//! bitmask, an optional reentrant [`LockContext`], and optional quantum-state
//! fields. Tokens normally live in a [`TokenTable`], which hands out
//! [`TokenId`] handles, detects stale handles, and keeps entanglement links
//! symmetric across tokens.
//!
//! # Lifecycle
//!
//! ```text
//! construct ──► validate ──► assign ──► (lock/unlock)* ──► destroy
//!   ALLOCATED     GOVERNED    INITIALIZED    LOCKED on 0↔1
//! ```
//!
//! `is_valid` requires both `INITIALIZED` and `GOVERNED`.

pub mod bits;
pub mod kind;
pub mod lock;
pub mod table;

pub use bits::ValidationBits;
pub use kind::{TokenType, TokenValue};
pub use lock::{Acquired, LockContext, Released};
pub use table::TokenTable;

use crate::error::{Error, ErrorKind, Result};
use crate::memory::{MemorySpan, validate_alignment};
use crate::quantum::{EntanglementLink, Superposition};
use crate::tracing_compat::debug;
use crate::types::OwnerId;
use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// Position in the source text a token was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file name.
    pub file: String,
    /// One-based line.
    pub line: u32,
    /// One-based column.
    pub column: u32,
}

impl SourceLocation {
    /// Creates a source location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A unit of governed computation state.
pub struct Token {
    pub(crate) ty: TokenType,
    pub(crate) value: TokenValue,
    pub(crate) span: Option<MemorySpan>,
    pub(crate) bits: ValidationBits,
    pub(crate) lock: Option<Arc<LockContext>>,
    pub(crate) superposition: Option<Superposition>,
    pub(crate) phase: f64,
    pub(crate) links: SmallVec<[EntanglementLink; 2]>,
    pub(crate) location: Option<SourceLocation>,
}

impl Token {
    /// Constructs a token over `span` with a lock context.
    ///
    /// Sets `ALLOCATED`; the value is uninitialized and all quantum fields
    /// are empty.
    #[must_use]
    pub fn construct(ty: TokenType, span: MemorySpan) -> Self {
        let mut token = Self::bare(ty, Some(span));
        token.lock = Some(Arc::new(LockContext::new()));
        token
    }

    /// Constructs a token without a lock context. `lock` will fail on it.
    #[must_use]
    pub fn construct_lockless(ty: TokenType, span: MemorySpan) -> Self {
        Self::bare(ty, Some(span))
    }

    /// Constructs a token that has no backing span. It never validates.
    #[must_use]
    pub fn construct_unbacked(ty: TokenType) -> Self {
        Self::bare(ty, None)
    }

    fn bare(ty: TokenType, span: Option<MemorySpan>) -> Self {
        let mut bits = ValidationBits::empty();
        if span.is_some() {
            bits.insert(ValidationBits::ALLOCATED);
        }
        Self {
            ty,
            value: TokenValue::Uninit,
            span,
            bits,
            lock: None,
            superposition: None,
            phase: 0.0,
            links: SmallVec::new(),
            location: None,
        }
    }

    /// Attaches source-location metadata.
    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns the type tag.
    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        self.ty
    }

    /// Returns the value.
    #[must_use]
    pub const fn value(&self) -> &TokenValue {
        &self.value
    }

    /// Returns the backing span.
    #[must_use]
    pub const fn span(&self) -> Option<&MemorySpan> {
        self.span.as_ref()
    }

    /// Returns the backing span mutably, e.g. to realign it.
    pub fn span_mut(&mut self) -> Option<&mut MemorySpan> {
        self.span.as_mut()
    }

    /// Returns the recorded source location.
    #[must_use]
    pub const fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Returns the validation bits, including `LOCKED` while the lock is held.
    #[must_use]
    pub fn validation_bits(&self) -> ValidationBits {
        let mut bits = self.bits;
        if self.lock.as_ref().is_some_and(|l| l.is_held()) {
            bits.insert(ValidationBits::LOCKED);
        }
        bits
    }

    /// Returns true if every bit of `flag` is set.
    #[must_use]
    pub fn has(&self, flag: ValidationBits) -> bool {
        self.validation_bits().contains(flag)
    }

    /// Governance validation.
    ///
    /// Fails without setting `GOVERNED` if `ALLOCATED` is unset, the span is
    /// absent, or the span's alignment is not a power of two. Idempotent.
    pub fn validate(&mut self) -> bool {
        if !self.bits.contains(ValidationBits::ALLOCATED) {
            return false;
        }
        let Some(span) = &self.span else {
            return false;
        };
        if !validate_alignment(span.alignment()) {
            return false;
        }
        self.bits.insert(ValidationBits::GOVERNED);
        true
    }

    /// Binds `value`, setting `INITIALIZED` unconditionally.
    pub fn assign(&mut self, value: impl Into<TokenValue>) {
        self.value = value.into();
        self.bits.insert(ValidationBits::INITIALIZED);
    }

    /// True when both `INITIALIZED` and `GOVERNED` are set.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.bits
            .contains(ValidationBits::INITIALIZED.union(ValidationBits::GOVERNED))
    }

    /// Returns the lock context, if the token has one.
    #[must_use]
    pub fn lock_context(&self) -> Option<&Arc<LockContext>> {
        self.lock.as_ref()
    }

    /// Acquires the token lock for `owner`, blocking on another owner.
    ///
    /// Fails only if the token has no lock context.
    pub fn lock(&self, owner: OwnerId) -> Result<Acquired> {
        let lock = self.require_lock()?;
        let acquired = lock.lock(owner);
        if acquired == Acquired::First {
            debug!(%owner, ty = %self.ty, "token locked");
        }
        Ok(acquired)
    }

    /// Acquires the token lock without blocking.
    pub fn try_lock(&self, owner: OwnerId) -> Result<Acquired> {
        let lock = self.require_lock()?;
        let acquired = lock.try_lock(owner)?;
        if acquired == Acquired::First {
            debug!(%owner, ty = %self.ty, "token locked");
        }
        Ok(acquired)
    }

    /// Releases one level of the token lock for `owner`.
    pub fn unlock(&self, owner: OwnerId) -> Result<Released> {
        let lock = self.require_lock()?;
        let released = lock
            .unlock(owner)
            .map_err(|e| e.with_location(self.location.clone()))?;
        if released == Released::Freed {
            debug!(%owner, ty = %self.ty, "token unlocked");
        }
        Ok(released)
    }

    fn require_lock(&self) -> Result<&Arc<LockContext>> {
        self.lock.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NoLockContext).with_location(self.location.clone())
        })
    }

    /// Sets or clears the reserved `PERSISTENT` flag.
    pub fn set_persistent(&mut self, on: bool) {
        self.toggle(ValidationBits::PERSISTENT, on);
    }

    /// Sets or clears the reserved `SHADOW` flag.
    pub fn set_shadow(&mut self, on: bool) {
        self.toggle(ValidationBits::SHADOW, on);
    }

    fn toggle(&mut self, flag: ValidationBits, on: bool) {
        if on {
            self.bits.insert(flag);
        } else {
            self.bits.remove(flag);
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("ty", &self.ty)
            .field("value", &self.value)
            .field("bits", &self.validation_bits())
            .field("span", &self.span)
            .field("superposition", &self.superposition)
            .field("phase", &self.phase)
            .field("links", &self.links)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
