//! The signed activation token.
//!
//! A token is the server's signed projection of a license (or trial) onto one
//! machine. The client never edits a token: it is replaced whole on every
//! successful sync or consumed offline response.

use crate::envelope;
use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a token activates a license or a verified trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    License,
    Trial,
}

/// How the license counts activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseType {
    /// Each machine consumes one activation slot.
    NodeLocked,
    /// Slots are leased from a floating pool.
    HostedFloating,
}

impl LicenseType {
    /// Returns the wire name of the license type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeLocked => "node-locked",
            Self::HostedFloating => "hosted-floating",
        }
    }
}

/// A bounded consumption counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterAttribute {
    pub name: String,
    pub allowed_uses: u64,
    pub total_uses: u64,
}

/// The user a license is issued to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseUser {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The signed token payload (matches the server JSON structure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub kind: TokenKind,
    pub activation_id: String,
    pub product_id: String,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub trial_id: Option<String>,
    pub fingerprint: String,
    pub issued_at: DateTime<Utc>,
    /// Absent for perpetual licenses.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_sync_grace_period_days: u32,
    #[serde(default)]
    pub server_sync_interval_secs: u64,
    #[serde(default)]
    pub meter_attributes: Vec<MeterAttribute>,
    /// Activation (or trial activation) metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub license_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub user: Option<LicenseUser>,
    #[serde(default)]
    pub license_type: Option<LicenseType>,
    #[serde(default)]
    pub allowed_activations: Option<u32>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub suspended: bool,
}

impl TokenPayload {
    /// Serializes and signs the payload into an envelope string.
    pub fn seal(&self, signing_key: &SigningKey) -> LicenseResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(envelope::seal(&json, signing_key))
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> LicenseResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| LicenseError::InvalidPayload(format!("invalid token JSON: {e}")))
    }

    /// Returns true if the token expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Returns a meter attribute by name.
    #[must_use]
    pub fn meter_attribute(&self, name: &str) -> Option<&MeterAttribute> {
        self.meter_attributes.iter().find(|m| m.name == name)
    }
}

/// A token whose signature, product, machine and clock checks all passed.
///
/// Holds the exact envelope string it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    raw: String,
    payload: TokenPayload,
}

impl VerifiedToken {
    pub(crate) fn new(raw: String, payload: TokenPayload) -> Self {
        Self { raw, payload }
    }

    /// Returns the envelope string.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    /// Returns when the server's grace window closes, given the last
    /// successful sync.
    #[must_use]
    pub fn grace_period_expiry(&self, last_successful_sync: DateTime<Utc>) -> DateTime<Utc> {
        last_successful_sync + Duration::days(i64::from(self.payload.server_sync_grace_period_days))
    }

    /// Returns an activation metadata value.
    pub fn metadata(&self, key: &str) -> LicenseResult<&str> {
        self.payload
            .metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| LicenseError::MetadataNotFound(key.to_string()))
    }

    /// Returns a license metadata value.
    pub fn license_metadata(&self, key: &str) -> LicenseResult<&str> {
        self.payload
            .license_metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| LicenseError::MetadataNotFound(key.to_string()))
    }

    /// Returns the license user, if the license has one.
    #[must_use]
    pub fn user(&self) -> Option<&LicenseUser> {
        self.payload.user.as_ref()
    }
}
