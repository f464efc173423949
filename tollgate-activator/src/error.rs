//! Activator error types.

use crate::transport::TransportError;
use thiserror::Error;
use tollgate_license::LicenseError;

/// Result type for activator operations.
pub type ActivatorResult<T> = Result<T, ActivatorError>;

/// Errors surfaced by the [`crate::Activator`] facade.
#[derive(Debug, Error)]
pub enum ActivatorError {
    #[error(transparent)]
    License(#[from] LicenseError),

    #[error("server request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync scheduler not running")]
    SchedulerStopped,
}

impl ActivatorError {
    /// Returns true if the server could not be reached or answered with a
    /// transient failure. These failures count against the grace period.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_network())
    }

    /// Returns true if the server asked us to back off.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_rate_limited())
    }

    /// Returns the underlying license error, if any.
    #[must_use]
    pub fn as_license(&self) -> Option<&LicenseError> {
        match self {
            Self::License(e) => Some(e),
            _ => None,
        }
    }
}
