//! Offline activation protocol.
//!
//! For machines without network access the exchange happens through files
//! the user carries to and from an operator:
//!
//! 1. the client generates a request (digest envelope) and remembers its
//!    correlation id;
//! 2. the operator feeds it to the license server, which answers with a
//!    signed response carrying the same correlation id;
//! 3. the client consumes the response: signature, kind and correlation id
//!    must all match before any state changes.
//!
//! Deactivation follows the same shape; its response is the server's proof
//! that the activation slot was released, and consuming it erases the local
//! token. Rejected responses never modify stored state.

use crate::clock::Clock;
use crate::device::DeviceInfo;
use crate::envelope;
use crate::error::{LicenseError, LicenseResult};
use crate::session::ActivationSession;
use crate::storage::{Slot, SlotStorage};
use crate::token::VerifiedToken;
use crate::trial::TrialSession;
use crate::verify::TokenVerifier;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// What an offline exchange does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineKind {
    Activation,
    Deactivation,
    Trial,
}

/// Uses of one meter attribute reported in an offline activation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterUses {
    pub name: String,
    pub uses: u64,
}

/// The request file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRequest {
    pub kind: OfflineKind,
    pub correlation_id: Uuid,
    pub product_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub activation_id: Option<String>,
    #[serde(default)]
    pub meter_attributes: Vec<MeterUses>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub app_version: Option<String>,
    pub device: DeviceInfo,
    pub requested_at: DateTime<Utc>,
}

impl OfflineRequest {
    /// Encodes the request as a digest envelope.
    pub fn encode(&self) -> LicenseResult<String> {
        Ok(envelope::seal_digest(&serde_json::to_vec(self)?))
    }

    /// Decodes a request file (used by the issuing side).
    pub fn decode(blob: &str) -> LicenseResult<Self> {
        let bytes = envelope::open_digest(blob)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LicenseError::InvalidPayload(format!("invalid offline request: {e}")))
    }
}

/// The response file content, signed by the license server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineResponse {
    pub kind: OfflineKind,
    pub correlation_id: Uuid,
    /// Replacement token envelope (activation and trial responses).
    #[serde(default)]
    pub token: Option<String>,
    /// Released activation (deactivation responses).
    #[serde(default)]
    pub activation_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl OfflineResponse {
    /// Signs the response into an envelope (used by the issuing side).
    pub fn seal(&self, signing_key: &SigningKey) -> LicenseResult<String> {
        Ok(envelope::seal(&serde_json::to_vec(self)?, signing_key))
    }
}

/// What consuming a response did.
#[derive(Debug, Clone)]
pub enum OfflineOutcome {
    Activated(Arc<VerifiedToken>),
    TrialActivated(Arc<VerifiedToken>),
    Deactivated { activation_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRequest {
    kind: OfflineKind,
    correlation_id: Uuid,
    #[serde(default)]
    activation_id: Option<String>,
}

/// Generates requests and consumes responses.
pub struct OfflineProtocol {
    verifier: TokenVerifier,
    storage: Arc<dyn SlotStorage>,
    clock: Arc<dyn Clock>,
    meter_uses: Mutex<BTreeMap<String, u64>>,
}

impl OfflineProtocol {
    pub fn new(verifier: TokenVerifier, storage: Arc<dyn SlotStorage>) -> Self {
        let clock = verifier.clock().clone();
        Self {
            verifier,
            storage,
            clock,
            meter_uses: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records meter attribute uses to embed in the next activation request.
    pub fn set_meter_attribute_uses(&self, name: &str, uses: u64) -> LicenseResult<()> {
        if name.trim().is_empty() {
            return Err(LicenseError::InvalidArgument(
                "meter attribute name is empty".to_string(),
            ));
        }
        self.meter_uses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), uses);
        Ok(())
    }

    /// Builds an activation request for `license_key`.
    pub fn activation_request(
        &self,
        license_key: &str,
        metadata: BTreeMap<String, String>,
        app_version: Option<String>,
    ) -> LicenseResult<String> {
        let meter_attributes = self
            .meter_uses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, uses)| MeterUses {
                name: name.clone(),
                uses: *uses,
            })
            .collect();

        let mut request = self.base_request(OfflineKind::Activation, metadata, app_version);
        request.license_key = Some(license_key.to_string());
        request.meter_attributes = meter_attributes;
        self.issue(request)
    }

    /// Builds a verified-trial request.
    pub fn trial_request(
        &self,
        metadata: BTreeMap<String, String>,
        app_version: Option<String>,
    ) -> LicenseResult<String> {
        let request = self.base_request(OfflineKind::Trial, metadata, app_version);
        self.issue(request)
    }

    /// Builds a deactivation request for the current activation.
    pub fn deactivation_request(&self, session: &ActivationSession) -> LicenseResult<String> {
        let token = session.require()?;
        let mut request = self.base_request(OfflineKind::Deactivation, BTreeMap::new(), None);
        request.license_key = token.payload().license_key.clone();
        request.activation_id = Some(token.payload().activation_id.clone());
        self.issue(request)
    }

    fn base_request(
        &self,
        kind: OfflineKind,
        metadata: BTreeMap<String, String>,
        app_version: Option<String>,
    ) -> OfflineRequest {
        OfflineRequest {
            kind,
            correlation_id: Uuid::new_v4(),
            product_id: self.verifier.product().product_id().to_string(),
            fingerprint: self.verifier.fingerprint(),
            license_key: None,
            activation_id: None,
            meter_attributes: Vec::new(),
            metadata,
            app_version,
            device: DeviceInfo::collect(),
            requested_at: self.clock.now(),
        }
    }

    fn issue(&self, request: OfflineRequest) -> LicenseResult<String> {
        let blob = request.encode()?;
        let pending = PendingRequest {
            kind: request.kind,
            correlation_id: request.correlation_id,
            activation_id: request.activation_id.clone(),
        };
        self.storage
            .write(Slot::OfflineRequest, &serde_json::to_string(&pending)?)?;

        info!(
            "generated offline {:?} request {}",
            request.kind, request.correlation_id
        );
        Ok(blob)
    }

    fn pending(&self) -> LicenseResult<Option<PendingRequest>> {
        match self.storage.read(Slot::OfflineRequest)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Verifies a response's signature and pairs it with the pending request.
    pub fn open_response(&self, blob: &str) -> LicenseResult<OfflineResponse> {
        let bytes = envelope::open(blob, &self.verifier.product().verifying_key()?)?;
        let response: OfflineResponse = serde_json::from_slice(&bytes)
            .map_err(|e| LicenseError::InvalidPayload(format!("invalid offline response: {e}")))?;

        match self.pending()? {
            Some(pending)
                if pending.correlation_id == response.correlation_id
                    && pending.kind == response.kind =>
            {
                Ok(response)
            }
            _ => {
                warn!(
                    "rejected offline response {} that matches no pending request",
                    response.correlation_id
                );
                Err(LicenseError::StaleOrForeignResponse)
            }
        }
    }

    /// Applies a response to the matching session. On any error stored
    /// state is untouched and the request stays pending.
    pub fn consume(
        &self,
        blob: &str,
        session: &ActivationSession,
        trial: &TrialSession,
    ) -> LicenseResult<OfflineOutcome> {
        let response = self.open_response(blob)?;

        let outcome = match response.kind {
            OfflineKind::Activation => {
                let token = response.token.as_deref().ok_or_else(|| {
                    LicenseError::InvalidPayload("activation response without token".to_string())
                })?;
                OfflineOutcome::Activated(session.replace(token)?)
            }
            OfflineKind::Trial => {
                let token = response.token.as_deref().ok_or_else(|| {
                    LicenseError::InvalidPayload("trial response without token".to_string())
                })?;
                OfflineOutcome::TrialActivated(trial.replace(token)?)
            }
            OfflineKind::Deactivation => {
                let released = response.activation_id.clone().ok_or_else(|| {
                    LicenseError::InvalidPayload(
                        "deactivation response without activation id".to_string(),
                    )
                })?;
                let pending_id = self.pending()?.and_then(|p| p.activation_id);
                if pending_id.as_deref() != Some(released.as_str()) {
                    return Err(LicenseError::StaleOrForeignResponse);
                }
                session.clear()?;
                OfflineOutcome::Deactivated {
                    activation_id: released,
                }
            }
        };

        // The response already took effect; a leftover request only means a
        // replay of this same response is accepted once more.
        if let Err(e) = self.storage.remove(Slot::OfflineRequest) {
            warn!("failed to remove consumed offline request: {e}");
        }
        if response.kind == OfflineKind::Activation {
            self.meter_uses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }

        info!(
            "consumed offline {:?} response {}",
            response.kind, response.correlation_id
        );
        Ok(outcome)
    }

    /// Forgets any pending request.
    pub fn clear(&self) -> LicenseResult<()> {
        self.storage.remove(Slot::OfflineRequest)
    }
}
