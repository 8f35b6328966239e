use thiserror::Error;

use crate::types::ChallengeKind;

/// Top-level error type for the Vigil system.
///
/// Subsystem crates define their own error types and convert into
/// `VigilError` at the boundary so `?` works across crates. The variants
/// also encode the propagation policy: see [`VigilError::is_retryable`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Target ({x}, {y}) is outside the locked region")]
    OutOfRegion { x: i32, y: i32 },

    #[error("Guardrail denied: {0}")]
    GuardrailDenied(String),

    #[error("No observable effect within {waited_ms}ms")]
    VerificationTimeout { waited_ms: u64 },

    #[error("Aborted by kill switch")]
    Aborted,

    #[error("Human handoff required: {0} challenge detected")]
    HumanHandoff(ChallengeKind),

    #[error("Capture process crashed: {0}")]
    ProcessCrash(String),

    #[error("Injection error: {0}")]
    Injection(String),

    #[error("Another intent is already executing")]
    Busy,

    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VigilError {
    /// Whether the executor may retry the failing operation locally.
    ///
    /// Perception and verification failures are retried up to the
    /// configured limits; guardrail, abort, and handoff errors terminate
    /// the intent immediately and are surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VigilError::Perception(_)
                | VigilError::VerificationTimeout { .. }
                | VigilError::Capture(_)
        )
    }
}

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VigilError {
    fn from(err: toml::ser::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;
