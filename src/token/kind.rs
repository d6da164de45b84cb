//! Token type tags and values.

use crate::types::TokenId;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::memory::SpanKind;

/// Type tag of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Integer scalar.
    Int,
    /// Floating-point scalar.
    Float,
    /// Text.
    String,
    /// Role identifier.
    Role,
    /// Bit mask.
    Mask,
    /// Operator.
    Op,
    /// Fixed-length array.
    Array,
    /// Growable vector.
    Vector,
    /// Key/value map.
    Map,
    /// Heterogeneous tuple.
    Tuple,
    /// Data-structure aggregate.
    Dsa,
    /// Quantum byte.
    QByte,
    /// Quantum role.
    QRole,
    /// Quantum matrix.
    QMatrix,
    /// Quantum integer.
    QInt,
    /// Quantum float.
    QFloat,
}

impl TokenType {
    /// Every token type, classical kinds first.
    pub const ALL: [Self; 16] = [
        Self::Int,
        Self::Float,
        Self::String,
        Self::Role,
        Self::Mask,
        Self::Op,
        Self::Array,
        Self::Vector,
        Self::Map,
        Self::Tuple,
        Self::Dsa,
        Self::QByte,
        Self::QRole,
        Self::QMatrix,
        Self::QInt,
        Self::QFloat,
    ];

    /// Returns the stable upper-case name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::Role => "ROLE",
            Self::Mask => "MASK",
            Self::Op => "OP",
            Self::Array => "ARRAY",
            Self::Vector => "VECTOR",
            Self::Map => "MAP",
            Self::Tuple => "TUPLE",
            Self::Dsa => "DSA",
            Self::QByte => "QBYTE",
            Self::QRole => "QROLE",
            Self::QMatrix => "QMATRIX",
            Self::QInt => "QINT",
            Self::QFloat => "QFLOAT",
        }
    }

    /// Returns true for the quantum kinds.
    #[must_use]
    pub const fn is_quantum(self) -> bool {
        matches!(
            self,
            Self::QByte | Self::QRole | Self::QMatrix | Self::QInt | Self::QFloat
        )
    }

    /// Span kind a token of this type is backed by when none is given.
    #[must_use]
    pub const fn natural_span_kind(self) -> SpanKind {
        match self {
            Self::Vector | Self::Map | Self::String => SpanKind::Continuous,
            Self::Array | Self::Tuple => SpanKind::Row,
            _ if self.is_quantum() => SpanKind::Superposed,
            _ => SpanKind::Fixed,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Value carried by a token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum TokenValue {
    /// Constructed but never assigned.
    #[default]
    Uninit,
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered aggregate of values.
    Aggregate(Vec<TokenValue>),
    /// Reference to another token.
    Handle(TokenId),
}

impl TokenValue {
    /// Returns true if the value was never assigned.
    #[must_use]
    pub const fn is_uninit(&self) -> bool {
        matches!(self, Self::Uninit)
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for TokenValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for TokenValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for TokenValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TokenValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for TokenValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
