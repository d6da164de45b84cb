//! Governed memory span descriptors.
//!
//! A [`MemorySpan`] describes a region's kind, length, alignment, access mask
//! and direction. Spans are issued by a [`SpanRegistry`], which enforces
//! live-count and live-byte ceilings, and are owned by the token that
//! requested them.

pub mod registry;
pub mod span;

pub use registry::{SpanLedger, SpanRegistry, SpanStats};
pub use span::{AccessMask, MemorySpan, SpanKind, SpanMode, default_alignment, validate_alignment};
