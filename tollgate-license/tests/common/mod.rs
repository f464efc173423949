//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tollgate_license::{
    ActivationSession, GraceBoundary, LicenseType, LicenseUser, ManualClock, MemoryStorage,
    MeterAttribute, Product, SlotStorage, StaticFingerprinter, TokenKind, TokenPayload,
    TokenVerifier, TrialSession, Watermark,
};

pub const PRODUCT_ID: &str = "prod-7f3a";
pub const MACHINE: &str = "machine-a";

/// Returns a deterministic Ed25519 key pair from a fixed seed.
pub fn test_keypair() -> (SigningKey, [u8; 32]) {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key.to_bytes())
}

/// A second, unrelated key pair.
pub fn other_keypair() -> (SigningKey, [u8; 32]) {
    let signing_key = SigningKey::from_bytes(&[9u8; 32]);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key.to_bytes())
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn test_product() -> Product {
    let (_, pk) = test_keypair();
    let mut metadata = BTreeMap::new();
    metadata.insert("edition".to_string(), "pro".to_string());
    Product::new(PRODUCT_ID, pk, metadata).unwrap()
}

/// A license token issued at `issued_at`, expiring 30 days later.
pub fn license_payload(issued_at: DateTime<Utc>) -> TokenPayload {
    let mut metadata = BTreeMap::new();
    metadata.insert("seat".to_string(), "build-agent".to_string());
    let mut license_metadata = BTreeMap::new();
    license_metadata.insert("tier".to_string(), "gold".to_string());

    TokenPayload {
        kind: TokenKind::License,
        activation_id: "act-1".to_string(),
        product_id: PRODUCT_ID.to_string(),
        license_key: Some("AAAA-BBBB-CCCC-DDDD".to_string()),
        trial_id: None,
        fingerprint: MACHINE.to_string(),
        issued_at,
        expires_at: Some(issued_at + Duration::days(30)),
        server_sync_grace_period_days: 3,
        server_sync_interval_secs: 3600,
        meter_attributes: vec![MeterAttribute {
            name: "exports".to_string(),
            allowed_uses: 10,
            total_uses: 2,
        }],
        metadata,
        license_metadata,
        user: Some(LicenseUser {
            email: "test@example.com".to_string(),
            name: "Test User".to_string(),
            company: "Example Co".to_string(),
            metadata: BTreeMap::new(),
        }),
        license_type: Some(LicenseType::NodeLocked),
        allowed_activations: Some(3),
        revoked: false,
        suspended: false,
    }
}

pub fn trial_payload(issued_at: DateTime<Utc>) -> TokenPayload {
    TokenPayload {
        kind: TokenKind::Trial,
        activation_id: "trial-act-1".to_string(),
        license_key: None,
        trial_id: Some("trial-42".to_string()),
        expires_at: Some(issued_at + Duration::days(14)),
        meter_attributes: Vec::new(),
        user: None,
        license_type: None,
        allowed_activations: None,
        ..license_payload(issued_at)
    }
}

pub fn sign(payload: &TokenPayload) -> String {
    let (sk, _) = test_keypair();
    payload.seal(&sk).unwrap()
}

/// Wires a verifier, sessions and storage around a manual clock.
pub struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub clock: ManualClock,
    pub verifier: TokenVerifier,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        Self::with_machine(storage, MACHINE)
    }

    pub fn with_machine(storage: Arc<MemoryStorage>, machine: &str) -> Self {
        let clock = ManualClock::new(fixed_now());
        let dyn_storage: Arc<dyn SlotStorage> = storage.clone();
        let verifier = TokenVerifier::new(
            Arc::new(test_product()),
            Arc::new(StaticFingerprinter(machine.to_string())),
            Arc::new(Watermark::new(dyn_storage)),
            Arc::new(clock.clone()),
        );
        Self {
            storage,
            clock,
            verifier,
        }
    }

    pub fn dyn_storage(&self) -> Arc<dyn SlotStorage> {
        self.storage.clone()
    }

    pub fn session(&self) -> ActivationSession {
        ActivationSession::new(self.verifier.clone(), self.dyn_storage(), GraceBoundary::Exclusive)
    }

    pub fn trial_session(&self) -> TrialSession {
        TrialSession::new(self.verifier.clone(), self.dyn_storage())
    }
}
