//! Span registry with live-count and live-byte ceilings.

use crate::config::SpanConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::span::{MemorySpan, SpanKind, SpanMode, default_alignment, validate_alignment};

/// Shared accounting for spans issued by one registry.
///
/// Spans hold an `Arc` to the ledger so they can return their bytes on drop
/// even after the registry handle is gone.
#[derive(Debug, Default)]
pub struct SpanLedger {
    live_spans: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    total_created: AtomicU64,
    exhaustions: AtomicU64,
}

impl SpanLedger {
    fn try_reserve(&self, bytes: usize, config: &SpanConfig) -> bool {
        let spans_ok = self
            .live_spans
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < config.max_spans).then_some(n + 1)
            })
            .is_ok();
        if !spans_ok {
            return false;
        }
        let bytes_ok = self
            .live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_add(bytes)
                    .filter(|total| *total <= config.max_total_bytes)
            });
        match bytes_ok {
            Ok(prev) => {
                self.peak_bytes.fetch_max(prev + bytes, Ordering::Relaxed);
                self.total_created.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.live_spans.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }

    pub(crate) fn release(&self, bytes: usize) {
        self.live_spans.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Point-in-time view of a registry's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanStats {
    /// Spans currently alive.
    pub live_spans: usize,
    /// Bytes currently alive.
    pub live_bytes: usize,
    /// Highest live byte count observed.
    pub peak_bytes: usize,
    /// Spans ever created.
    pub total_created: u64,
    /// Creations rejected for exhaustion.
    pub exhaustions: u64,
}

/// Issues [`MemorySpan`]s and enforces the configured ceilings.
///
/// Cloning shares the same ledger.
#[derive(Debug, Clone)]
pub struct SpanRegistry {
    config: SpanConfig,
    mode: SpanMode,
    ledger: Arc<SpanLedger>,
}

impl Default for SpanRegistry {
    fn default() -> Self {
        Self::new(SpanConfig::default())
    }
}

impl SpanRegistry {
    /// Creates a hybrid-mode registry.
    #[must_use]
    pub fn new(config: SpanConfig) -> Self {
        Self::with_mode(config, SpanMode::Hybrid)
    }

    /// Creates a registry with an explicit alignment regime.
    #[must_use]
    pub fn with_mode(config: SpanConfig, mode: SpanMode) -> Self {
        Self {
            config,
            mode,
            ledger: Arc::new(SpanLedger::default()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SpanConfig {
        &self.config
    }

    /// Returns the alignment regime.
    #[must_use]
    pub const fn mode(&self) -> SpanMode {
        self.mode
    }

    /// Creates a span of `kind` with `byte_length` bytes.
    ///
    /// The span is open, forward, fully accessible, and aligned for its kind.
    /// Fails with [`ErrorKind::InvalidAlignment`] when the configured alignment
    /// for `kind` is not a power of two, and with [`ErrorKind::SpanExhausted`]
    /// when either ceiling is reached.
    pub fn create(&self, kind: SpanKind, byte_length: usize) -> Result<MemorySpan> {
        let alignment = default_alignment(kind, self.mode, &self.config);
        if !validate_alignment(alignment) {
            warn!(%kind, alignment, mode = ?self.mode, "configured span alignment rejected");
            return Err(Error::new(ErrorKind::InvalidAlignment).with_message(format!(
                "configured alignment {alignment} for {kind} spans is not a power of two"
            )));
        }
        if !self.ledger.try_reserve(byte_length, &self.config) {
            self.ledger.exhaustions.fetch_add(1, Ordering::Relaxed);
            let stats = self.stats();
            warn!(
                %kind,
                byte_length,
                live_spans = stats.live_spans,
                live_bytes = stats.live_bytes,
                "span registry exhausted"
            );
            return Err(Error::new(ErrorKind::SpanExhausted).with_message(format!(
                "{kind} span of {byte_length} bytes ({} spans / {} bytes live)",
                stats.live_spans, stats.live_bytes
            )));
        }
        trace!(%kind, byte_length, alignment, "span created");
        Ok(MemorySpan::issued(
            kind,
            byte_length,
            alignment,
            Some(Arc::clone(&self.ledger)),
        ))
    }

    /// Returns current accounting.
    #[must_use]
    pub fn stats(&self) -> SpanStats {
        SpanStats {
            live_spans: self.ledger.live_spans.load(Ordering::Acquire),
            live_bytes: self.ledger.live_bytes.load(Ordering::Acquire),
            peak_bytes: self.ledger.peak_bytes.load(Ordering::Relaxed),
            total_created: self.ledger.total_created.load(Ordering::Relaxed),
            exhaustions: self.ledger.exhaustions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AccessMask, validate_alignment};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn create_assigns_defaults() {
        init_test("create_assigns_defaults");
        let registry = SpanRegistry::default();
        let span = registry.create(SpanKind::Fixed, 4096).unwrap();
        assert_eq!(span.alignment(), 4096);
        assert_eq!(span.bytes(), 4096);
        assert_eq!(span.access, AccessMask::FULL);
        assert!(span.open);
        let quantum = registry.create(SpanKind::Superposed, 32).unwrap();
        assert_eq!(quantum.alignment(), 8);
        assert!(validate_alignment(quantum.alignment()));
        crate::test_complete!("create_assigns_defaults");
    }

    #[test]
    fn span_ceiling_exhausts_and_recovers_on_drop() {
        init_test("span_ceiling_exhausts_and_recovers_on_drop");
        let registry = SpanRegistry::new(SpanConfig::default().with_max_spans(2));
        let a = registry.create(SpanKind::Row, 8).unwrap();
        let _b = registry.create(SpanKind::Row, 8).unwrap();
        let err = registry.create(SpanKind::Row, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpanExhausted);
        assert!(err.kind().is_retryable());
        drop(a);
        assert!(registry.create(SpanKind::Row, 8).is_ok());
        assert_eq!(registry.stats().exhaustions, 1);
        crate::test_complete!("span_ceiling_exhausts_and_recovers_on_drop");
    }

    #[test]
    fn byte_ceiling_is_enforced() {
        init_test("byte_ceiling_is_enforced");
        let registry = SpanRegistry::new(SpanConfig::default().with_max_total_bytes(100));
        let span = registry.create(SpanKind::Continuous, 60).unwrap();
        assert!(registry.create(SpanKind::Continuous, 41).is_err());
        let stats = registry.stats();
        assert_eq!(stats.live_spans, 1);
        assert_eq!(stats.live_bytes, 60);
        drop(span);
        assert_eq!(registry.stats().live_bytes, 0);
        assert_eq!(registry.stats().peak_bytes, 60);
        crate::test_complete!("byte_ceiling_is_enforced");
    }

    #[test]
    fn classical_mode_page_aligns_quantum_kinds() {
        init_test("classical_mode_page_aligns_quantum_kinds");
        let registry = SpanRegistry::with_mode(SpanConfig::default(), SpanMode::Classical);
        let span = registry.create(SpanKind::Entangled, 16).unwrap();
        assert_eq!(span.alignment(), 4096);
        crate::test_complete!("classical_mode_page_aligns_quantum_kinds");
    }

    #[test]
    fn non_power_of_two_alignment_is_refused() {
        init_test("non_power_of_two_alignment_is_refused");
        let registry = SpanRegistry::new(SpanConfig {
            classical_alignment: 24,
            ..SpanConfig::default()
        });
        let err = registry.create(SpanKind::Fixed, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
        assert!(!err.kind().is_retryable());
        let stats = registry.stats();
        assert_eq!(stats.live_spans, 0);
        assert_eq!(stats.total_created, 0);
        assert_eq!(stats.exhaustions, 0);

        // Kinds that draw from a valid setting are unaffected.
        let quantum = registry.create(SpanKind::Superposed, 16).unwrap();
        assert_eq!(quantum.alignment(), 8);
        let classical = SpanRegistry::with_mode(*registry.config(), SpanMode::Classical);
        let err = classical.create(SpanKind::Entangled, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
        crate::test_complete!("non_power_of_two_alignment_is_refused");
    }
}
