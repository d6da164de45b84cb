//! Slab-backed token storage with stale-handle detection.

use crate::error::{Error, ErrorKind, Result};
use crate::memory::{SpanKind, SpanRegistry};
use crate::observability::GovernanceAccounting;
use crate::tracing_compat::{debug, error};
use crate::types::{OwnerId, TokenId};
use slab::Slab;
use std::sync::Arc;

use super::{Acquired, LockContext, Released, SourceLocation, Token, TokenType, TokenValue};

#[derive(Debug)]
struct Slot {
    serial: u64,
    token: Token,
}

/// Owns tokens and hands out [`TokenId`] handles.
///
/// A table belongs to one logical unit. Other units reach a token's lock
/// through [`lock_context`](Self::lock_context), never through shared
/// mutable token state.
#[derive(Debug)]
pub struct TokenTable {
    slots: Slab<Slot>,
    next_serial: u64,
    spans: SpanRegistry,
    accounting: Arc<GovernanceAccounting>,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new(SpanRegistry::default())
    }
}

impl TokenTable {
    /// Creates an empty table drawing spans from `spans`.
    #[must_use]
    pub fn new(spans: SpanRegistry) -> Self {
        Self::with_accounting(spans, Arc::new(GovernanceAccounting::new()))
    }

    /// Creates an empty table that reports into shared accounting.
    #[must_use]
    pub fn with_accounting(spans: SpanRegistry, accounting: Arc<GovernanceAccounting>) -> Self {
        Self {
            slots: Slab::new(),
            next_serial: 1,
            spans,
            accounting,
        }
    }

    /// Returns the span registry.
    #[must_use]
    pub const fn span_registry(&self) -> &SpanRegistry {
        &self.spans
    }

    /// Returns the accounting sink.
    #[must_use]
    pub const fn accounting(&self) -> &Arc<GovernanceAccounting> {
        &self.accounting
    }

    /// Constructs a token of `ty` backed by a new `kind` span of `byte_length`.
    ///
    /// Fails with [`ErrorKind::SpanExhausted`] when the span registry is full.
    pub fn construct(
        &mut self,
        ty: TokenType,
        kind: SpanKind,
        byte_length: usize,
    ) -> Result<TokenId> {
        let span = self.spans.create(kind, byte_length)?;
        Ok(self.insert(Token::construct(ty, span)))
    }

    /// Like [`construct`](Self::construct), recording where the token came from.
    pub fn construct_at(
        &mut self,
        ty: TokenType,
        kind: SpanKind,
        byte_length: usize,
        location: SourceLocation,
    ) -> Result<TokenId> {
        let span = self.spans.create(kind, byte_length)?;
        Ok(self.insert(Token::construct(ty, span).at(location)))
    }

    /// Adopts an externally constructed token.
    pub fn insert(&mut self, token: Token) -> TokenId {
        let serial = self.next_serial;
        self.next_serial += 1;
        let slot = self.slots.insert(Slot { serial, token });
        self.accounting.token_constructed();
        TokenId::new(slot as u32, serial)
    }

    /// Returns true if `handle` refers to a live token.
    #[must_use]
    pub fn contains(&self, handle: TokenId) -> bool {
        self.slots
            .get(handle.slot() as usize)
            .is_some_and(|s| s.serial == handle.serial())
    }

    /// Returns the token behind `handle`.
    pub fn get(&self, handle: TokenId) -> Result<&Token> {
        match self.slots.get(handle.slot() as usize) {
            Some(slot) if slot.serial == handle.serial() => Ok(&slot.token),
            _ => Err(stale(handle)),
        }
    }

    /// Returns the token behind `handle` mutably.
    pub fn get_mut(&mut self, handle: TokenId) -> Result<&mut Token> {
        match self.slots.get_mut(handle.slot() as usize) {
            Some(slot) if slot.serial == handle.serial() => Ok(&mut slot.token),
            _ => Err(stale(handle)),
        }
    }

    /// Governance validation; see [`Token::validate`].
    pub fn validate(&mut self, handle: TokenId) -> Result<bool> {
        let accounting = Arc::clone(&self.accounting);
        let token = self.get_mut(handle)?;
        let passed = token.validate();
        if passed {
            accounting.validation_passed();
        } else {
            accounting.validation_failed();
            debug!(token = %handle, ty = %token.ty, "validation failed");
        }
        Ok(passed)
    }

    /// Binds a value; see [`Token::assign`].
    pub fn assign(&mut self, handle: TokenId, value: impl Into<TokenValue>) -> Result<()> {
        self.get_mut(handle)?.assign(value);
        Ok(())
    }

    /// True when the token is initialized and governed.
    pub fn is_valid(&self, handle: TokenId) -> Result<bool> {
        Ok(self.get(handle)?.is_valid())
    }

    /// Acquires the token lock, blocking on another owner.
    pub fn lock(&self, handle: TokenId, owner: OwnerId) -> Result<Acquired> {
        self.get(handle)?
            .lock(owner)
            .map_err(|e| e.with_token(handle))
    }

    /// Acquires the token lock without blocking.
    pub fn try_lock(&self, handle: TokenId, owner: OwnerId) -> Result<Acquired> {
        self.get(handle)?.try_lock(owner).map_err(|e| {
            if e.kind() == ErrorKind::LockedByOther {
                self.accounting.lock_contended();
            }
            e.with_token(handle)
        })
    }

    /// Releases one level of the token lock.
    pub fn unlock(&self, handle: TokenId, owner: OwnerId) -> Result<Released> {
        self.get(handle)?
            .unlock(owner)
            .map_err(|e| e.with_token(handle))
    }

    /// Shares the token's lock with another unit.
    pub fn lock_context(&self, handle: TokenId) -> Result<Arc<LockContext>> {
        let token = self.get(handle)?;
        token.lock.clone().ok_or_else(|| {
            Error::new(ErrorKind::NoLockContext)
                .with_token(handle)
                .with_location(token.location.clone())
        })
    }

    /// Destroys a token on behalf of `owner`.
    ///
    /// A lock held by `owner` is force-released, entanglement links are
    /// removed from both sides, and the span is returned to its registry.
    /// Destroying a token locked by another owner is a governance violation
    /// and leaves the token untouched.
    pub fn destroy(&mut self, handle: TokenId, owner: OwnerId) -> Result<()> {
        let token = self.get(handle)?;
        if let Some(lock) = &token.lock {
            if let Some(holder) = lock.owner().filter(|h| *h != owner) {
                self.accounting.governance_violation();
                error!(
                    token = %handle,
                    %holder,
                    caller = %owner,
                    location = ?token.location,
                    "destroy attempted on token locked by another owner"
                );
                return Err(Error::new(ErrorKind::LockedByOther)
                    .with_message(format!("destroy by {owner} while held by {holder}"))
                    .with_token(handle)
                    .with_location(token.location.clone()));
            }
            let depth = lock.force_release(owner);
            if depth > 0 {
                debug!(token = %handle, %owner, depth, "force-released lock on destroy");
            }
        }

        let slot = self.slots.remove(handle.slot() as usize);
        for link in &slot.token.links {
            if let Ok(partner) = self.get_mut(link.partner) {
                partner.drop_links_to(handle);
            }
        }
        self.accounting.token_destroyed();
        debug!(token = %handle, ty = %slot.token.ty, "token destroyed");
        Ok(())
    }

    /// Number of live tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no tokens are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handles of all live tokens, in slot order.
    pub fn handles(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.slots
            .iter()
            .map(|(slot, s)| TokenId::new(slot as u32, s.serial))
    }
}

fn stale(handle: TokenId) -> Error {
    Error::new(ErrorKind::StaleToken).with_token(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpanConfig;
    use crate::token::ValidationBits;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn basic_lifecycle() {
        init_test("basic_lifecycle");
        let mut table = TokenTable::default();
        let me = OwnerId::new(1);
        let t = table.construct(TokenType::Int, SpanKind::Fixed, 4096).unwrap();
        assert_eq!(table.get(t).unwrap().span().unwrap().alignment(), 4096);
        assert!(table.validate(t).unwrap());
        table.assign(t, 42_i64).unwrap();
        assert!(table.is_valid(t).unwrap());
        table.lock(t, me).unwrap();
        table.unlock(t, me).unwrap();
        table.destroy(t, me).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.span_registry().stats().live_spans, 0);
        assert_eq!(table.accounting().validations_passed(), 1);
        crate::test_complete!("basic_lifecycle");
    }

    #[test]
    fn stale_handle_is_rejected() {
        init_test("stale_handle_is_rejected");
        let mut table = TokenTable::default();
        let me = OwnerId::new(1);
        let t = table.construct(TokenType::Int, SpanKind::Fixed, 8).unwrap();
        table.destroy(t, me).unwrap();
        let reused = table.construct(TokenType::Float, SpanKind::Fixed, 8).unwrap();
        assert_eq!(reused.slot(), t.slot());
        assert_eq!(table.get(t).unwrap_err().kind(), ErrorKind::StaleToken);
        assert_eq!(table.destroy(t, me).unwrap_err().kind(), ErrorKind::StaleToken);
        assert!(table.contains(reused));
        crate::test_complete!("stale_handle_is_rejected");
    }

    #[test]
    fn destroy_force_releases_own_lock() {
        init_test("destroy_force_releases_own_lock");
        let mut table = TokenTable::default();
        let me = OwnerId::new(1);
        let t = table.construct(TokenType::Int, SpanKind::Fixed, 8).unwrap();
        table.lock(t, me).unwrap();
        table.lock(t, me).unwrap();
        let shared = table.lock_context(t).unwrap();
        table.destroy(t, me).unwrap();
        assert!(!shared.is_held());
        crate::test_complete!("destroy_force_releases_own_lock");
    }

    #[test]
    fn destroy_locked_by_other_is_violation() {
        init_test("destroy_locked_by_other_is_violation");
        let mut table = TokenTable::default();
        let holder = OwnerId::new(1);
        let intruder = OwnerId::new(2);
        let t = table.construct(TokenType::Int, SpanKind::Fixed, 8).unwrap();
        table.lock(t, holder).unwrap();
        let err = table.destroy(t, intruder).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockedByOther);
        assert!(err.is_governance_violation());
        assert!(table.contains(t));
        assert!(table.get(t).unwrap().has(ValidationBits::LOCKED));
        assert_eq!(table.accounting().governance_violations(), 1);
        assert_eq!(
            table.try_lock(t, intruder).unwrap_err().kind(),
            ErrorKind::LockedByOther
        );
        assert_eq!(table.accounting().lock_contentions(), 1);
        crate::test_complete!("destroy_locked_by_other_is_violation");
    }

    #[test]
    fn construction_reports_exhaustion() {
        init_test("construction_reports_exhaustion");
        let mut table = TokenTable::new(SpanRegistry::new(SpanConfig::default().with_max_spans(1)));
        let _t = table.construct(TokenType::Int, SpanKind::Fixed, 8).unwrap();
        let err = table
            .construct(TokenType::Int, SpanKind::Fixed, 8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpanExhausted);
        crate::test_complete!("construction_reports_exhaustion");
    }

    #[test]
    fn misaligned_span_fails_validation() {
        init_test("misaligned_span_fails_validation");
        let spans = SpanRegistry::new(SpanConfig {
            classical_alignment: 24,
            ..SpanConfig::default()
        });
        let mut table = TokenTable::new(spans);
        let err = table
            .construct(TokenType::Int, SpanKind::Fixed, 8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
        assert!(table.is_empty());

        // A span that bypassed the registry is still caught at validation.
        let span = crate::memory::MemorySpan::issued(SpanKind::Fixed, 8, 24, None);
        let t = table.insert(Token::construct(TokenType::Int, span));
        assert!(!table.validate(t).unwrap());
        assert!(!table.get(t).unwrap().has(ValidationBits::GOVERNED));
        assert_eq!(table.accounting().validations_failed(), 1);
        assert!(table.get_mut(t).unwrap().span_mut().unwrap().realign(32));
        assert!(table.validate(t).unwrap());
        crate::test_complete!("misaligned_span_fails_validation");
    }
}
