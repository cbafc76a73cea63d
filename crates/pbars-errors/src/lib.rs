//! Error taxonomy for the progress-bar telemetry core.
//!
//! `PbarsError` is the single error type returned across the intake,
//! sampling, predictor, and pub/sub crates. Each subsystem nests its own
//! detail type as a field rather than defining a parallel top-level enum,
//! leaving exit-code-style classification to one place.

use std::fmt;
use thiserror::Error;

/// What an incoming step event disagreed with the registered schema on.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftReason {
    /// The event named a step at `position` that is not in the current schema.
    UnknownPosition { position: u32 },
    /// The event's step name did not match the schema's name for that position.
    NameMismatch {
        position: u32,
        expected: String,
        actual: String,
    },
    /// The event's iterated-ness (or presence/absence of `iterations`) disagreed with the schema.
    IteratedMismatch { position: u32, expected_iterated: bool },
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPosition { position } => {
                write!(f, "position {position} is not part of the current schema")
            }
            Self::NameMismatch {
                position,
                expected,
                actual,
            } => write!(
                f,
                "position {position} expected step '{expected}', got '{actual}'"
            ),
            Self::IteratedMismatch {
                position,
                expected_iterated,
            } => write!(
                f,
                "position {position} expected iterated={expected_iterated}"
            ),
        }
    }
}

/// Full detail surfaced with a `SchemaDrift` error, enough for an external
/// re-registration path to act on without re-deriving it from the event.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftDetails {
    pub owner: String,
    pub bar_name: String,
    pub observed_version: u64,
    pub reason: DriftReason,
}

impl fmt::Display for DriftDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} at version {}: {}",
            self.owner, self.bar_name, self.observed_version, self.reason
        )
    }
}

/// Why a step event was rejected by the intake state machine's ordering and
/// timestamp rules (§4.D rules 2-5).
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    OutOfOrderStart { expected_position: u32, got: u32 },
    NoActiveStep { position: u32 },
    IterationNotMonotonic { position: u32, stored: u64, got: u64 },
    IterationExceedsTotal { position: u32, iterations: u64, got: u64 },
    FinishBeforeLastIteration { position: u32, iterations: u64, at: u64 },
    NonMonotonicTimestamp { position: u32, previous: f64, got: f64 },
    TraceNotFresh { expected_first_position: u32 },
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrderStart { expected_position, got } => write!(
                f,
                "expected StepStart at position {expected_position}, got {got}"
            ),
            Self::NoActiveStep { position } => {
                write!(f, "no active step at position {position}")
            }
            Self::IterationNotMonotonic { position, stored, got } => write!(
                f,
                "step {position}: iteration {got} is not greater than stored {stored}"
            ),
            Self::IterationExceedsTotal { position, iterations, got } => write!(
                f,
                "step {position}: iteration {got} exceeds iterations {iterations}"
            ),
            Self::FinishBeforeLastIteration { position, iterations, at } => write!(
                f,
                "step {position}: finish at iteration {at}, expected {iterations}"
            ),
            Self::NonMonotonicTimestamp { position, previous, got } => write!(
                f,
                "step {position}: timestamp {got} precedes previous {previous}"
            ),
            Self::TraceNotFresh { expected_first_position } => write!(
                f,
                "first event must be StepStart at position {expected_first_position}"
            ),
        }
    }
}

/// The core's top-level error type (§7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PbarsError {
    #[error("no such progress bar: {owner}/{bar_name}")]
    NoSuchBar { owner: String, bar_name: String },

    #[error("schema drift: {0}")]
    SchemaDrift(DriftDetails),

    #[error("validation error: {0}")]
    ValidationError(ValidationFailure),

    #[error("conflict on trace {trace_uid} after {attempts} CAS attempts")]
    Conflict { trace_uid: String, attempts: u32 },

    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl PbarsError {
    /// Conflict and StoreUnavailable are the only kinds a caller may retry;
    /// everything else is a terminal outcome for the current attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StoreUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, PbarsError>;
