//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every error
//! in the kernel is per-call and recoverable: callers retry, back off until a
//! breaker recovers, or re-authenticate.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Credential verification and issuance failures.
///
/// Always recoverable: the caller must re-authenticate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Token does not have three decodable segments.
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    /// `exp` claim is in the past.
    #[error("token expired")]
    Expired,

    /// No retained secret reproduces the signature.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signing was requested before a secret was initialized.
    #[error("no active signing secret")]
    NoActiveSecret,
}

/// Main error enum for the actor kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload does not match the registered schema.
    #[error("validation failed for {event_type}: {}", .errors.join("; "))]
    ValidationFailed {
        event_type: String,
        errors: Vec<String>,
    },

    /// Target actor does not declare the event among its consumed events.
    #[error("event {event_type} is not handled by actor {actor}")]
    NotHandled { event_type: String, actor: String },

    /// Circuit breaker is open; fail fast and back off.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Protected operation did not settle within its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Admission denied by a rate limiter.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Credential errors.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Failure reported by an actor handler.
    #[error("handler error: {0}")]
    Handler(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal errors (recovered panics, closed channels).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code for wire surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ValidationFailed { .. } => "VALIDATION_FAILED",
            Error::NotHandled { .. } => "NOT_HANDLED",
            Error::CircuitOpen(_) => "CIRCUIT_OPEN",
            Error::Timeout(_) => "TIMEOUT",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::Credential(err) => match err {
                CredentialError::InvalidFormat(_) => "INVALID_FORMAT",
                CredentialError::Expired => "EXPIRED",
                CredentialError::InvalidSignature(_) => "INVALID_SIGNATURE",
                CredentialError::NoActiveSecret => "NO_ACTIVE_SECRET",
            },
            Error::Handler(_) => "HANDLER_FAILED",
            Error::Config(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation_failed(event_type: impl Into<String>, errors: Vec<String>) -> Self {
        Self::ValidationFailed {
            event_type: event_type.into(),
            errors,
        }
    }

    pub fn not_handled(event_type: impl Into<String>, actor: impl Into<String>) -> Self {
        Self::NotHandled {
            event_type: event_type.into(),
            actor: actor.into(),
        }
    }

    pub fn circuit_open(msg: impl Into<String>) -> Self {
        Self::CircuitOpen(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
