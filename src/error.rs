//! Error types and error handling strategy for the governor.
//!
//! Every governed operation returns an explicit result; nothing here aborts
//! the process on caller error. Errors are grouped into the categories the
//! governance layer reasons about:
//!
//! - **Resource exhaustion**: span budget or telemetry registry full. The caller
//!   may back off and retry, or reject the request that triggered it.
//! - **Governance violation**: a call sequence that bypasses an invariant
//!   (destroy while locked by another owner, collapse of a non-superposed token,
//!   registration without validation). Always a caller bug.
//! - **Alignment violation**: a non-power-of-two alignment. Never rounded.
//! - **Liveness**: a unit stopped heartbeating or overran its time budget.
//! - **Misuse**: operating on a token or unit that no longer exists.

use core::fmt;

use crate::token::SourceLocation;
use crate::types::{TokenId, UnitId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Resource exhaustion ===
    /// The span registry cannot admit another span.
    SpanExhausted,
    /// The telemetry registry has no free slot.
    RegistryFull,

    // === Governance violations ===
    /// Destroy attempted while another owner holds the token lock.
    LockedByOther,
    /// Unlock attempted by an owner that does not hold the lock.
    NotLockOwner,
    /// Unlock attempted while the lock depth is already zero.
    NotLocked,
    /// The token has no lock context.
    NoLockContext,
    /// Collapse or measurement of a token that is not superposed.
    NotSuperposed,
    /// Spawn rejected by the hierarchy governor.
    SpawnRejected,

    // === Alignment ===
    /// Alignment is zero or not a power of two.
    InvalidAlignment,

    // === Quantum argument errors ===
    /// Superposition requested with no states.
    EmptySuperposition,
    /// Amplitude count does not match state count.
    AmplitudeMismatch,
    /// State index outside the superposition.
    IndexOutOfRange,
    /// No state satisfies the requested probability threshold.
    ThresholdNotMet,
    /// A token cannot be entangled with itself.
    SelfEntanglement,

    // === Liveness ===
    /// The unit missed its heartbeat window.
    Ghosted,
    /// The unit exceeded its execution-time ceiling.
    ExecutionTimeExceeded,

    // === Misuse ===
    /// The token handle refers to a destroyed token.
    StaleToken,
    /// The unit id is not registered.
    UnknownUnit,
    /// The root sentinel cannot be terminated or re-parented.
    RootSentinel,
    /// Spawning the underlying OS thread or process failed.
    SpawnFailed,
    /// Writing the event log failed.
    EventLog,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::SpanExhausted | Self::RegistryFull => ErrorCategory::ResourceExhaustion,
            Self::LockedByOther
            | Self::NotLockOwner
            | Self::NotLocked
            | Self::NoLockContext
            | Self::NotSuperposed
            | Self::SpawnRejected => ErrorCategory::GovernanceViolation,
            Self::InvalidAlignment => ErrorCategory::AlignmentViolation,
            Self::Ghosted | Self::ExecutionTimeExceeded => ErrorCategory::Liveness,
            Self::EmptySuperposition
            | Self::AmplitudeMismatch
            | Self::IndexOutOfRange
            | Self::ThresholdNotMet
            | Self::SelfEntanglement
            | Self::StaleToken
            | Self::UnknownUnit
            | Self::RootSentinel
            | Self::SpawnFailed
            | Self::EventLog => ErrorCategory::Misuse,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::SpanExhausted | Self::SpawnRejected | Self::SpawnFailed | Self::EventLog => {
                Recoverability::Transient
            }

            Self::LockedByOther
            | Self::NotLockOwner
            | Self::NotLocked
            | Self::NoLockContext
            | Self::NotSuperposed
            | Self::InvalidAlignment
            | Self::EmptySuperposition
            | Self::AmplitudeMismatch
            | Self::IndexOutOfRange
            | Self::SelfEntanglement
            | Self::StaleToken
            | Self::RootSentinel => Recoverability::Permanent,

            // A full registry after validation is a bypass, not backpressure.
            Self::RegistryFull
            | Self::ThresholdNotMet
            | Self::Ghosted
            | Self::ExecutionTimeExceeded
            | Self::UnknownUnit => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    /// Returns a short static description.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SpanExhausted => "memory span budget exhausted",
            Self::RegistryFull => "telemetry registry full",
            Self::LockedByOther => "token locked by another owner",
            Self::NotLockOwner => "caller does not own the token lock",
            Self::NotLocked => "token lock depth already zero",
            Self::NoLockContext => "token has no lock context",
            Self::NotSuperposed => "token is not superposed",
            Self::SpawnRejected => "spawn rejected by hierarchy governor",
            Self::InvalidAlignment => "alignment must be a non-zero power of two",
            Self::EmptySuperposition => "superposition requires at least one state",
            Self::AmplitudeMismatch => "amplitude count does not match state count",
            Self::IndexOutOfRange => "state index out of range",
            Self::ThresholdNotMet => "no state meets the probability threshold",
            Self::SelfEntanglement => "token cannot be entangled with itself",
            Self::Ghosted => "unit missed its heartbeat window",
            Self::ExecutionTimeExceeded => "unit exceeded its execution time",
            Self::StaleToken => "token handle refers to a destroyed token",
            Self::UnknownUnit => "unit is not registered",
            Self::RootSentinel => "operation not permitted on the root sentinel",
            Self::SpawnFailed => "failed to start governed unit",
            Self::EventLog => "event log write failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Span or registry capacity exhausted.
    ResourceExhaustion,
    /// Invariant-enforcing call sequence was bypassed.
    GovernanceViolation,
    /// Non-power-of-two alignment.
    AlignmentViolation,
    /// Missed heartbeats or execution-time overrun.
    Liveness,
    /// Invalid arguments or stale handles.
    Misuse,
}

/// Diagnostic context attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Token involved in the error.
    pub token: Option<TokenId>,
    /// Unit involved in the error.
    pub unit: Option<UnitId>,
    /// Source location recorded on the token, when known.
    pub location: Option<SourceLocation>,
}

/// The main error type for governor operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: ErrorContext {
                token: None,
                unit: None,
                location: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is a governance violation.
    #[must_use]
    pub const fn is_governance_violation(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::GovernanceViolation)
    }

    /// Adds a message to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches the token involved.
    #[must_use]
    pub fn with_token(mut self, token: TokenId) -> Self {
        self.context.token = Some(token);
        self
    }

    /// Attaches the unit involved.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitId) -> Self {
        self.context.unit = Some(unit);
        self
    }

    /// Attaches the token's recorded source location.
    #[must_use]
    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.context.location = location;
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the diagnostic context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(token) = self.context.token {
            write!(f, " [token {token}]")?;
        }
        if let Some(unit) = self.context.unit {
            write!(f, " [unit {unit}]")?;
        }
        if let Some(location) = &self.context.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A specialized result type for governor operations.
pub type Result<T> = core::result::Result<T, Error>;
