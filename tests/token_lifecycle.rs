//! Token lifecycle integration tests: construction, governance, locking,
//! destruction, and span accounting.

mod common;
use common::*;

use rift_governor::memory::SpanMode;
use rift_governor::token::{Acquired, Released};
use rift_governor::{
    ErrorCategory, ErrorKind, OwnerId, SourceLocation, SpanConfig, SpanKind, SpanRegistry,
    TokenTable, TokenType, TokenValue, ValidationBits,
};
use std::sync::Arc;
use std::thread;

#[test]
fn basic_lifecycle_round_trip() {
    init_test("basic_lifecycle_round_trip");
    let mut tokens = TokenTable::default();
    let owner = OwnerId::new(1);

    let t = tokens
        .construct(TokenType::Int, SpanKind::Fixed, 4096)
        .unwrap();
    let token = tokens.get(t).unwrap();
    assert_eq!(token.span().unwrap().alignment(), 4096);
    assert!(token.has(ValidationBits::ALLOCATED));
    assert!(token.value().is_uninit());

    assert!(tokens.validate(t).unwrap());
    tokens.assign(t, 42).unwrap();
    assert!(tokens.is_valid(t).unwrap());
    assert_eq!(tokens.get(t).unwrap().value(), &TokenValue::Int(42));

    assert_eq!(tokens.lock(t, owner).unwrap(), Acquired::First);
    assert!(tokens.get(t).unwrap().has(ValidationBits::LOCKED));
    assert_eq!(tokens.unlock(t, owner).unwrap(), Released::Freed);
    assert!(!tokens.get(t).unwrap().has(ValidationBits::LOCKED));

    tokens.destroy(t, owner).unwrap();
    assert!(tokens.is_empty());
    assert_eq!(tokens.get(t).unwrap_err().kind(), ErrorKind::StaleToken);
    assert_eq!(tokens.span_registry().stats().live_spans, 0);
    test_complete!("basic_lifecycle_round_trip");
}

#[test]
fn is_valid_needs_both_bindings() {
    init_test("is_valid_needs_both_bindings");
    let mut tokens = TokenTable::default();
    let assigned_only = tokens
        .construct(TokenType::Float, SpanKind::Row, 64)
        .unwrap();
    tokens.assign(assigned_only, 1.5).unwrap();
    assert!(!tokens.is_valid(assigned_only).unwrap());

    let governed_only = tokens
        .construct(TokenType::String, SpanKind::Continuous, 64)
        .unwrap();
    assert!(tokens.validate(governed_only).unwrap());
    assert!(!tokens.is_valid(governed_only).unwrap());

    assert!(tokens.validate(assigned_only).unwrap());
    assert!(tokens.is_valid(assigned_only).unwrap());
    test_complete!("is_valid_needs_both_bindings");
}

#[test]
fn reentrant_lock_releases_at_depth_zero() {
    init_test("reentrant_lock_releases_at_depth_zero");
    let mut tokens = TokenTable::default();
    let t = tokens
        .construct(TokenType::Mask, SpanKind::Fixed, 8)
        .unwrap();
    let owner = OwnerId::new(7);
    let stranger = OwnerId::new(8);

    tokens.lock(t, owner).unwrap();
    assert_eq!(tokens.lock(t, owner).unwrap(), Acquired::Reentered(2));
    assert_eq!(tokens.unlock(t, owner).unwrap(), Released::Held(1));
    assert!(tokens.get(t).unwrap().has(ValidationBits::LOCKED));

    let err = tokens.unlock(t, stranger).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotLockOwner);
    assert_eq!(tokens.lock_context(t).unwrap().depth(), 1);

    assert_eq!(tokens.unlock(t, owner).unwrap(), Released::Freed);
    assert_eq!(
        tokens.unlock(t, owner).unwrap_err().kind(),
        ErrorKind::NotLocked
    );
    test_complete!("reentrant_lock_releases_at_depth_zero");
}

#[test]
fn destroy_locked_by_other_is_reported_and_counted() {
    init_test("destroy_locked_by_other_is_reported_and_counted");
    let mut tokens = TokenTable::default();
    let location = SourceLocation::new("pipeline.rift", 12, 4);
    let t = tokens
        .construct_at(TokenType::Op, SpanKind::Fixed, 32, location)
        .unwrap();
    let holder = OwnerId::new(1);
    let intruder = OwnerId::new(2);
    tokens.lock(t, holder).unwrap();

    let err = tokens.destroy(t, intruder).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockedByOther);
    assert_eq!(err.category(), ErrorCategory::GovernanceViolation);
    assert!(err.to_string().contains("pipeline.rift:12:4"));
    assert!(tokens.contains(t));
    assert_eq!(tokens.accounting().governance_violations(), 1);

    // The holder may destroy while still holding the lock.
    tokens.lock(t, holder).unwrap();
    tokens.destroy(t, holder).unwrap();
    assert!(!tokens.contains(t));
    test_complete!("destroy_locked_by_other_is_reported_and_counted");
}

#[test]
fn contended_lock_blocks_until_released() {
    init_test("contended_lock_blocks_until_released");
    let mut tokens = TokenTable::default();
    let t = tokens
        .construct(TokenType::Vector, SpanKind::Fixed, 128)
        .unwrap();
    let lock = tokens.lock_context(t).unwrap();
    let main = OwnerId::new(1);
    lock.lock(main);

    let worker_lock = Arc::clone(&lock);
    let worker = thread::spawn(move || {
        let owner = OwnerId::current_thread();
        worker_lock.lock(owner);
        let depth = worker_lock.depth();
        worker_lock.unlock(owner).unwrap();
        depth
    });
    while lock.contention() == 0 && !worker.is_finished() {
        thread::yield_now();
    }
    lock.unlock(main).unwrap();
    assert_eq!(worker.join().unwrap(), 1);
    assert!(!lock.is_held());
    test_complete!("contended_lock_blocks_until_released");
}

#[test]
fn span_budget_exhaustion_is_retryable() {
    init_test("span_budget_exhaustion_is_retryable");
    let spans = SpanRegistry::new(SpanConfig::default().with_max_spans(2));
    let mut tokens = TokenTable::new(spans);
    let owner = OwnerId::new(1);
    let a = tokens
        .construct(TokenType::Int, SpanKind::Fixed, 8)
        .unwrap();
    tokens
        .construct(TokenType::Int, SpanKind::Fixed, 8)
        .unwrap();
    let err = tokens
        .construct(TokenType::Int, SpanKind::Fixed, 8)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SpanExhausted);
    assert!(err.kind().is_retryable());

    tokens.destroy(a, owner).unwrap();
    assert!(tokens.construct(TokenType::Int, SpanKind::Fixed, 8).is_ok());
    test_complete!("span_budget_exhaustion_is_retryable");
}

#[test]
fn span_mode_picks_quantum_alignment() {
    init_test("span_mode_picks_quantum_alignment");
    let classical = SpanRegistry::with_mode(SpanConfig::default(), SpanMode::Classical);
    let hybrid = SpanRegistry::default();
    let distributed = hybrid.create(SpanKind::Distributed, 256).unwrap();
    assert_eq!(distributed.alignment(), 64);
    assert_eq!(hybrid.create(SpanKind::Superposed, 16).unwrap().alignment(), 8);
    assert_eq!(
        classical.create(SpanKind::Superposed, 16).unwrap().alignment(),
        4096
    );
    test_complete!("span_mode_picks_quantum_alignment");
}

#[test]
fn realign_rejects_non_power_of_two() {
    init_test("realign_rejects_non_power_of_two");
    let mut tokens = TokenTable::default();
    let t = tokens
        .construct(TokenType::Array, SpanKind::Row, 1024)
        .unwrap();
    let span = tokens.get_mut(t).unwrap().span_mut().unwrap();
    assert!(!span.realign(0));
    assert!(!span.realign(48));
    assert_eq!(span.alignment(), 4096);
    assert!(span.realign(16));
    assert!(tokens.validate(t).unwrap());
    test_complete!("realign_rejects_non_power_of_two");
}

#[test]
fn validation_ratio_tracks_threshold() {
    init_test("validation_ratio_tracks_threshold");
    let mut tokens = TokenTable::default();
    let mut handles = Vec::new();
    for _ in 0..6 {
        handles.push(
            tokens
                .construct(TokenType::QInt, SpanKind::Superposed, 16)
                .unwrap(),
        );
    }
    for handle in &handles {
        assert!(tokens.validate(*handle).unwrap());
    }
    let accounting = tokens.accounting();
    assert_eq!(accounting.validations_passed(), 6);
    assert!(accounting.meets_threshold());
    assert_eq!(accounting.live_tokens(), 6);
    assert_eq!(accounting.tokens_peak(), 6);
    test_complete!("validation_ratio_tracks_threshold");
}
