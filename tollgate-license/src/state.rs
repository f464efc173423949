//! License state machine.
//!
//! [`derive_state`] is the single decision point: given the outcome of token
//! verification, the current time and the sync bookkeeping, it returns one
//! of six states. It does no I/O.
//!
//! Precedence, strongest first:
//!
//! 1. verification failed → `Failed`
//! 2. server flag → `Revoked`, then `Suspended`
//! 3. expiry passed → `Expired`
//! 4. failing syncs past the grace window → `GracePeriodOver`
//! 5. otherwise `Valid`

use crate::error::LicenseError;
use crate::token::TokenPayload;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The derived validity of a license activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    Valid,
    Expired,
    Suspended,
    Revoked,
    GracePeriodOver,
    Failed,
}

impl LicenseState {
    /// Returns true if the application may run with full functionality.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
            Self::GracePeriodOver => "grace period over",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How the grace-period deadline itself is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraceBoundary {
    /// Over only once `now > deadline`; the deadline instant is still in grace.
    #[default]
    Exclusive,
    /// Over as soon as `now >= deadline`.
    Inclusive,
}

impl GraceBoundary {
    fn is_past(&self, now: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
        match self {
            Self::Exclusive => now > deadline,
            Self::Inclusive => now >= deadline,
        }
    }
}

/// Server sync bookkeeping, reset on every successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_successful_sync: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub grace_period_days: u32,
}

impl SyncState {
    /// Fresh state as of a successful sync (or activation) at `at`.
    #[must_use]
    pub fn synced_at(at: DateTime<Utc>, grace_period_days: u32) -> Self {
        Self {
            last_successful_sync: at,
            consecutive_failures: 0,
            grace_period_days,
        }
    }

    /// Records a successful sync.
    pub fn record_success(&mut self, at: DateTime<Utc>, grace_period_days: u32) {
        *self = Self::synced_at(at, grace_period_days);
    }

    /// Records a failed sync attempt.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Returns when the grace window closes.
    #[must_use]
    pub fn grace_period_expiry(&self) -> DateTime<Utc> {
        self.last_successful_sync + Duration::days(i64::from(self.grace_period_days))
    }
}

/// A state plus a human-readable reason, as delivered to status callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: LicenseState,
    pub reason: Option<String>,
}

impl StatusReport {
    pub fn new(state: LicenseState, reason: Option<String>) -> Self {
        Self { state, reason }
    }

    /// A `Failed` report carrying `reason`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(LicenseState::Failed, Some(reason.into()))
    }
}

/// Derives the license state. See the module docs for precedence.
#[must_use]
pub fn derive_state(
    verification: Result<&TokenPayload, &LicenseError>,
    now: DateTime<Utc>,
    sync: &SyncState,
    boundary: GraceBoundary,
) -> LicenseState {
    derive_report(verification, now, sync, boundary).state
}

/// Like [`derive_state`], also explaining the outcome.
#[must_use]
pub fn derive_report(
    verification: Result<&TokenPayload, &LicenseError>,
    now: DateTime<Utc>,
    sync: &SyncState,
    boundary: GraceBoundary,
) -> StatusReport {
    let payload = match verification {
        Ok(payload) => payload,
        Err(e) => return StatusReport::failed(e.to_string()),
    };

    if payload.revoked {
        return StatusReport::new(LicenseState::Revoked, Some("license revoked".to_string()));
    }
    if payload.suspended {
        return StatusReport::new(LicenseState::Suspended, Some("license suspended".to_string()));
    }
    if let Some(expires_at) = payload.expires_at.filter(|exp| *exp < now) {
        return StatusReport::new(LicenseState::Expired, Some(format!("expired at {expires_at}")));
    }
    if sync.consecutive_failures > 0 && boundary.is_past(now, sync.grace_period_expiry()) {
        return StatusReport::new(
            LicenseState::GracePeriodOver,
            Some(format!(
                "no successful server sync since {} ({} failed attempts)",
                sync.last_successful_sync, sync.consecutive_failures
            )),
        );
    }

    StatusReport::new(LicenseState::Valid, None)
}
