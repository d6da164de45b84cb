//! Property tests for alignment, lock depth, governance bits, entropy bounds,
//! and admission ceilings.

mod common;
use common::*;

use proptest::prelude::*;
use rift_governor::memory::{SpanMode, default_alignment, validate_alignment};
use rift_governor::{
    ErrorKind, LockContext, OwnerId, QuantumState, SpanConfig, SpanKind, SpanRegistry,
    TokenTable, TokenType, ValidationBits,
};

fn span_kind() -> impl Strategy<Value = SpanKind> {
    prop_oneof![
        Just(SpanKind::Fixed),
        Just(SpanKind::Row),
        Just(SpanKind::Continuous),
        Just(SpanKind::Superposed),
        Just(SpanKind::Entangled),
        Just(SpanKind::Distributed),
    ]
}

fn span_mode() -> impl Strategy<Value = SpanMode> {
    prop_oneof![
        Just(SpanMode::Classical),
        Just(SpanMode::Quantum),
        Just(SpanMode::Hybrid),
    ]
}

/// Mostly arbitrary values, with powers of two weighted in so both outcomes
/// show up.
fn alignment_setting() -> impl Strategy<Value = usize> {
    prop_oneof![
        (0_u32..13).prop_map(|shift| 1_usize << shift),
        any::<u16>().prop_map(usize::from),
    ]
}

#[derive(Debug, Clone, Copy)]
enum LockOp {
    Lock(u8),
    Unlock(u8),
}

fn lock_op() -> impl Strategy<Value = LockOp> {
    prop_oneof![
        (0_u8..3).prop_map(LockOp::Lock),
        (0_u8..3).prop_map(LockOp::Unlock),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn alignment_predicate_matches_power_of_two(value in any::<usize>()) {
        init_test_logging();
        prop_assert_eq!(validate_alignment(value), value.is_power_of_two());
    }

    #[test]
    fn issued_spans_are_aligned(
        kind in span_kind(),
        mode in span_mode(),
        bytes in 0_usize..1 << 20,
        classical in alignment_setting(),
        quantum in alignment_setting(),
        distributed in alignment_setting(),
    ) {
        init_test_logging();
        let config = SpanConfig {
            classical_alignment: classical,
            quantum_alignment: quantum,
            distributed_alignment: distributed,
            ..SpanConfig::default()
        };
        let configured = default_alignment(kind, mode, &config);
        let mut tokens = TokenTable::new(SpanRegistry::with_mode(config, mode));
        match tokens.construct(TokenType::Int, kind, bytes) {
            Ok(t) => {
                prop_assert!(configured.is_power_of_two());
                let alignment = tokens.get(t).unwrap().span().unwrap().alignment();
                prop_assert_eq!(alignment, configured);
                prop_assert!(tokens.validate(t).unwrap());
            }
            Err(err) => {
                prop_assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
                prop_assert!(!configured.is_power_of_two());
                prop_assert!(tokens.is_empty());
            }
        }
    }

    #[test]
    fn realign_keeps_alignment_valid(requests in prop::collection::vec(any::<u16>(), 1..16)) {
        init_test_logging();
        let mut tokens = TokenTable::default();
        let t = tokens.construct(TokenType::Array, SpanKind::Row, 64).unwrap();
        for request in requests {
            let request = usize::from(request);
            let span = tokens.get_mut(t).unwrap().span_mut().unwrap();
            let before = span.alignment();
            let accepted = span.realign(request);
            prop_assert_eq!(accepted, request.is_power_of_two());
            if !accepted {
                prop_assert_eq!(span.alignment(), before);
            }
            prop_assert!(span.alignment().is_power_of_two());
        }
        prop_assert!(tokens.validate(t).unwrap());
    }

    /// Against a model: the locked bit tracks depth > 0 and only the owner
    /// can change the depth.
    #[test]
    fn lock_depth_follows_model(ops in prop::collection::vec(lock_op(), 1..64)) {
        init_test_logging();
        let lock = LockContext::new();
        let mut model: Option<(u8, u32)> = None;
        for op in ops {
            match op {
                LockOp::Lock(who) => {
                    let owner = OwnerId::new(u64::from(who));
                    match model {
                        None => {
                            lock.lock(owner);
                            model = Some((who, 1));
                        }
                        Some((holder, depth)) if holder == who => {
                            lock.lock(owner);
                            model = Some((holder, depth + 1));
                        }
                        Some(_) => {
                            prop_assert!(lock.try_lock(owner).is_err());
                        }
                    }
                }
                LockOp::Unlock(who) => {
                    let owner = OwnerId::new(u64::from(who));
                    let result = lock.unlock(owner);
                    match model {
                        Some((holder, depth)) if holder == who => {
                            prop_assert!(result.is_ok());
                            model = (depth > 1).then_some((holder, depth - 1));
                        }
                        _ => prop_assert!(result.is_err()),
                    }
                }
            }
            let expected_depth = model.map_or(0, |(_, d)| d);
            prop_assert_eq!(lock.depth(), expected_depth);
            prop_assert_eq!(lock.is_held(), expected_depth > 0);
        }
    }

    /// Governed never appears without allocated, and validation never
    /// clears it once set.
    #[test]
    fn governance_is_monotone(kinds in prop::collection::vec(span_kind(), 1..8), rounds in 1_usize..4) {
        init_test_logging();
        let mut tokens = TokenTable::default();
        let handles: Vec<_> = kinds
            .iter()
            .map(|kind| tokens.construct(TokenType::Tuple, *kind, 32).unwrap())
            .collect();
        for _ in 0..rounds {
            for handle in &handles {
                prop_assert!(tokens.validate(*handle).unwrap());
                let bits = tokens.get(*handle).unwrap().validation_bits();
                prop_assert!(bits.contains(ValidationBits::GOVERNED));
                prop_assert!(bits.contains(ValidationBits::ALLOCATED));
            }
        }
        prop_assert!(tokens.accounting().meets_threshold());
    }

    #[test]
    fn entropy_is_bounded_by_log2_n(weights in prop::collection::vec(0.0_f64..1.0, 1..12)) {
        init_test_logging();
        let total: f64 = weights.iter().map(|w| w * w).sum();
        prop_assume!(total > 1e-6);
        let norm = total.sqrt();
        let amplitudes: Vec<f64> = weights.iter().map(|w| w / norm).collect();
        let states: Vec<QuantumState> = (0..weights.len())
            .map(|i| QuantumState::new(TokenType::QInt, i64::try_from(i).unwrap()))
            .collect();

        let mut tokens = TokenTable::default();
        let t = tokens.construct(TokenType::QInt, SpanKind::Superposed, 16).unwrap();
        tokens.superpose(t, states, Some(amplitudes)).unwrap();
        let entropy = tokens.entropy(t).unwrap();
        #[allow(clippy::cast_precision_loss)]
        let bound = (weights.len() as f64).log2();
        prop_assert!(entropy >= -1e-9);
        prop_assert!(entropy <= bound + 1e-9, "entropy {} above bound {}", entropy, bound);
    }

    /// No sequence of spawns gets past the per-parent or global ceiling.
    #[test]
    fn admission_never_exceeds_ceilings(
        parents in prop::collection::vec(0_usize..8, 1..80),
        max_children in 1_usize..6,
    ) {
        init_test_logging();
        let config = quiet_config()
            .with_max_children(max_children)
            .with_max_units(16);
        let (governor, _clock) = governor_with_virtual_clock(config);
        let mut units = vec![governor.root()];
        for pick in parents {
            let parent = units[pick % units.len()];
            if let Ok(unit) = governor.spawn(parent, simulated(), "prop()") {
                units.push(unit);
            }
            prop_assert!(governor.active_units() <= 16);
            for node in governor.hierarchy_dump() {
                prop_assert!(node.children.len() <= max_children);
            }
        }
        for record in governor.registry_dump() {
            prop_assert!(record.depth <= governor.config().max_hierarchy_depth);
        }
    }
}
