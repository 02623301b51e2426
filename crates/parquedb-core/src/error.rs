//! Error types shared across the ParqueDB crates
//!
//! Every error carries a stable name so retry predicates and callers can
//! dispatch without string-matching display output.

use thiserror::Error;

/// Errors surfaced by the ParqueDB core
#[derive(Debug, Error)]
pub enum Error {
    /// Object or entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency version check failed
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Concurrent writers collided on the same record
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// Conditional write precondition was not met
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Circuit breaker rejected the call without reaching the backend
    #[error("circuit '{circuit_name}' is open, retry in {remaining_ms}ms")]
    CircuitOpen {
        circuit_name: String,
        remaining_ms: u64,
    },

    /// Operation cancelled via an abort token
    #[error("operation aborted")]
    Aborted,

    /// Caller supplied invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Retryable failure (network, throttling, timeouts)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Terminal failure that retrying cannot fix
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Value cannot be represented in the variant encoding
    #[error("value is not encodable: {0}")]
    NotEncodable(String),

    /// Corrupt or truncated on-disk data
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Stable name used by retry predicates and error classification.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::VersionMismatch { .. } => "VersionMismatchError",
            Self::Concurrency(_) => "ConcurrencyError",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::CircuitOpen { .. } => "CircuitOpenError",
            Self::Aborted => "AbortError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Transient(_) => "TransientError",
            Self::Permanent(_) => "PermanentError",
            Self::NotEncodable(_) => "NotEncodable",
            Self::Codec(_) => "CodecError",
        }
    }

    /// Whether the default retry predicate should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Concurrency(_) | Self::VersionMismatch { .. } | Self::Transient(_)
        )
    }
}

/// Result type alias for core errors
pub type Result<T> = std::result::Result<T, Error>;
