//! Error types for the licensing core.

use thiserror::Error;

/// Broad classification of a [`LicenseError`].
///
/// Callers branch on this instead of matching every variant: integrity
/// failures are fatal to the operation, policy outcomes are reported as
/// states, usage errors are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad signature, foreign machine, clock rollback, stale offline response.
    Integrity,
    /// Expired, limit reached, not activated.
    Policy,
    /// Missing configuration or malformed input from the caller.
    Usage,
    /// Persistence failed.
    Storage,
}

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Envelope is not `payload.signature` or not valid base64url.
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    /// Ed25519 signature verification failed.
    #[error("token signature invalid")]
    InvalidSignature,

    /// Payload JSON is malformed or missing required fields.
    #[error("invalid token payload: {0}")]
    InvalidPayload(String),

    /// Token was issued for another product.
    #[error("token product mismatch: expected {expected}, found {found}")]
    ProductMismatch { expected: String, found: String },

    /// Token is pinned to a different machine.
    #[error("license is bound to a different machine")]
    MachineFingerprint,

    /// The system clock moved backwards past the observed watermark.
    #[error("system clock tampering detected")]
    ClockTamper,

    /// Server returned a token for a different activation than the one
    /// being synced.
    #[error("activation mismatch: expected {expected}, found {found}")]
    ActivationMismatch { expected: String, found: String },

    /// Offline response does not answer the last generated request.
    #[error("offline response does not match the pending request")]
    StaleOrForeignResponse,

    /// Offline request integrity digest does not match.
    #[error("offline request digest mismatch")]
    RequestDigestMismatch,

    /// No activation (or trial) is stored.
    #[error("license not activated")]
    NotActivated,

    /// No trial has been started.
    #[error("trial not started")]
    TrialNotStarted,

    /// Meter attribute name is unknown to the license.
    #[error("meter attribute not found: {0}")]
    MeterAttributeNotFound(String),

    /// Increment would exceed the allowed uses.
    #[error("meter attribute {name} limit reached ({allowed} allowed)")]
    MeterAttributeLimitReached { name: String, allowed: u64 },

    /// Metadata key is unknown.
    #[error("metadata key not found: {0}")]
    MetadataNotFound(String),

    /// Product descriptor has not been configured.
    #[error("product not set")]
    ProductNotSet,

    /// License key has not been configured.
    #[error("license key not set")]
    LicenseKeyNotSet,

    /// Caller supplied an unusable path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormat(_)
            | Self::InvalidSignature
            | Self::InvalidPayload(_)
            | Self::ProductMismatch { .. }
            | Self::MachineFingerprint
            | Self::ClockTamper
            | Self::StaleOrForeignResponse
            | Self::ActivationMismatch { .. }
            | Self::RequestDigestMismatch => ErrorKind::Integrity,
            Self::NotActivated
            | Self::TrialNotStarted
            | Self::MeterAttributeNotFound(_)
            | Self::MeterAttributeLimitReached { .. }
            | Self::MetadataNotFound(_) => ErrorKind::Policy,
            Self::ProductNotSet
            | Self::LicenseKeyNotSet
            | Self::InvalidPath(_)
            | Self::InvalidArgument(_) => ErrorKind::Usage,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Returns true for integrity failures.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}

impl From<std::io::Error> for LicenseError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
