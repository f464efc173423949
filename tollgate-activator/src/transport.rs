//! The license server seam.
//!
//! Everything the activator needs from the server goes through
//! [`LicenseTransport`]: each call either returns a signed token envelope
//! (which the caller verifies, never trusting the transport) or a
//! [`TransportError`].

use crate::types::{ActivationRequest, DeactivationRequest, SyncRequest, TrialRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Why a server call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited by server")]
    RateLimited,

    #[error("server error (HTTP {0})")]
    Server(u16),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("activation not allowed from this country")]
    CountryRestricted,

    #[error("request IP address does not match the activation")]
    IpMismatch,

    #[error("activation not found")]
    ActivationNotFound,

    #[error("activation limit reached")]
    ActivationLimitReached,

    #[error("license revoked")]
    Revoked,

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true for failures of reachability rather than of the
    /// request itself.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Dns(_)
                | Self::Tls(_)
                | Self::Connect(_)
                | Self::RateLimited
                | Self::Server(_)
        )
    }

    /// Returns true if the server asked us to back off.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Talks to the license server.
#[async_trait]
pub trait LicenseTransport: Send + Sync {
    /// Activates a license key on this machine; returns the token envelope.
    async fn activate(&self, req: &ActivationRequest) -> TransportResult<String>;

    /// Starts a verified trial on this machine; returns the trial envelope.
    async fn activate_trial(&self, req: &TrialRequest) -> TransportResult<String>;

    /// Reports usage and fetches a fresh token for an existing activation.
    async fn sync(&self, req: &SyncRequest) -> TransportResult<String>;

    /// Releases an activation.
    async fn deactivate(&self, req: &DeactivationRequest) -> TransportResult<()>;
}
