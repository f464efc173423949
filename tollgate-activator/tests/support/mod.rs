//! Shared helpers for activator tests: a fixed signing key, token builders
//! and a scripted in-memory transport.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tollgate_activator::{
    ActivationRequest, Activator, DeactivationRequest, InitContext, InitContextBuilder,
    LicenseTransport, SyncRequest, TransportError, TransportResult, TrialRequest,
};
use tollgate_license::{
    LicenseType, LicenseUser, ManualClock, MeterAttribute, PermissionScope, StaticFingerprinter,
    TokenKind, TokenPayload,
};

pub const PRODUCT_ID: &str = "prod-7f3a";
pub const MACHINE: &str = "machine-a";
pub const LICENSE_KEY: &str = "AAAA-BBBB-CCCC-DDDD";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Product descriptor JSON for [`signing_key`].
pub fn product_data() -> String {
    serde_json::json!({
        "product_id": PRODUCT_ID,
        "public_key": STANDARD.encode(signing_key().verifying_key().to_bytes()),
        "metadata": { "edition": "pro" },
    })
    .to_string()
}

pub fn license_payload(issued_at: DateTime<Utc>) -> TokenPayload {
    let mut metadata = BTreeMap::new();
    metadata.insert("seat".to_string(), "build-agent".to_string());
    let mut license_metadata = BTreeMap::new();
    license_metadata.insert("tier".to_string(), "gold".to_string());
    let mut user_metadata = BTreeMap::new();
    user_metadata.insert("team".to_string(), "infra".to_string());

    TokenPayload {
        kind: TokenKind::License,
        activation_id: "act-1".to_string(),
        product_id: PRODUCT_ID.to_string(),
        license_key: Some(LICENSE_KEY.to_string()),
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
            metadata: user_metadata,
        }),
        license_type: Some(LicenseType::NodeLocked),
        allowed_activations: Some(3),
        revoked: false,
        suspended: false,
    }
}

pub fn trial_payload(issued_at: DateTime<Utc>) -> TokenPayload {
    let mut metadata = BTreeMap::new();
    metadata.insert("campaign".to_string(), "spring".to_string());
    TokenPayload {
        kind: TokenKind::Trial,
        activation_id: "trial-act-1".to_string(),
        license_key: None,
        trial_id: Some("trial-42".to_string()),
        expires_at: Some(issued_at + Duration::days(14)),
        meter_attributes: Vec::new(),
        metadata,
        user: None,
        license_type: None,
        allowed_activations: None,
        ..license_payload(issued_at)
    }
}

pub fn sign(payload: &TokenPayload) -> String {
    payload.seal(&signing_key()).unwrap()
}

/// Transport that replays scripted responses and records requests.
#[derive(Default)]
pub struct ScriptedTransport {
    pub activations: Mutex<VecDeque<TransportResult<String>>>,
    pub trials: Mutex<VecDeque<TransportResult<String>>>,
    pub syncs: Mutex<VecDeque<TransportResult<String>>>,
    pub deactivations: Mutex<VecDeque<TransportResult<()>>>,
    pub sync_requests: Mutex<Vec<SyncRequest>>,
    pub activation_requests: Mutex<Vec<ActivationRequest>>,
    pub sync_calls: AtomicUsize,
    /// Simulated server latency for sync calls.
    pub sync_delay: Mutex<Option<std::time::Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_activation(&self, reply: TransportResult<String>) {
        self.activations.lock().unwrap().push_back(reply);
    }

    pub fn push_trial(&self, reply: TransportResult<String>) {
        self.trials.lock().unwrap().push_back(reply);
    }

    pub fn push_sync(&self, reply: TransportResult<String>) {
        self.syncs.lock().unwrap().push_back(reply);
    }

    pub fn push_deactivation(&self, reply: TransportResult<()>) {
        self.deactivations.lock().unwrap().push_back(reply);
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }
}

fn next<T>(queue: &Mutex<VecDeque<TransportResult<T>>>) -> TransportResult<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(TransportError::Server(503)))
}

#[async_trait]
impl LicenseTransport for ScriptedTransport {
    async fn activate(&self, req: &ActivationRequest) -> TransportResult<String> {
        self.activation_requests.lock().unwrap().push(req.clone());
        next(&self.activations)
    }

    async fn activate_trial(&self, _req: &TrialRequest) -> TransportResult<String> {
        next(&self.trials)
    }

    async fn sync(&self, req: &SyncRequest) -> TransportResult<String> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.sync_requests.lock().unwrap().push(req.clone());
        let delay = *self.sync_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        next(&self.syncs)
    }

    async fn deactivate(&self, _req: &DeactivationRequest) -> TransportResult<()> {
        next(&self.deactivations)
    }
}

/// Routes activator logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("tollgate_activator=debug,tollgate_license=debug")
            }),
        )
        .with_test_writer()
        .try_init();
}

pub fn context(storage_dir: &TempDir) -> InitContextBuilder {
    InitContext::builder()
        .product_data(product_data())
        .product_id(PRODUCT_ID, PermissionScope::User)
        .storage_dir(storage_dir.path())
        .license_key(LICENSE_KEY)
        .app_version("2.1.0")
}

/// An activator over a temp directory, a scripted transport and a manual
/// clock.
pub struct Harness {
    pub dir: TempDir,
    pub transport: Arc<ScriptedTransport>,
    pub clock: ManualClock,
    pub activator: Activator,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).build().unwrap();
        Self::with_context(dir, ctx)
    }

    pub fn with_context(dir: TempDir, ctx: InitContext) -> Self {
        init_tracing();
        let transport = ScriptedTransport::new();
        let clock = ManualClock::new(fixed_now());
        let activator = build(ctx, transport.clone(), &clock);
        Self {
            dir,
            transport,
            clock,
            activator,
        }
    }

    /// A second activator over the same storage, as after a restart.
    pub fn restart(&self) -> Activator {
        let ctx = context(&self.dir).build().unwrap();
        build(ctx, self.transport.clone(), &self.clock)
    }
}

fn build(ctx: InitContext, transport: Arc<ScriptedTransport>, clock: &ManualClock) -> Activator {
    Activator::with_components(
        ctx,
        transport,
        Arc::new(StaticFingerprinter(MACHINE.to_string())),
        Arc::new(clock.clone()),
    )
    .unwrap()
}

/// Counts status callback invocations and keeps the reports.
#[derive(Clone, Default)]
pub struct CallbackLog {
    pub count: Arc<AtomicUsize>,
    pub reports: Arc<Mutex<Vec<tollgate_license::StatusReport>>>,
}

impl CallbackLog {
    pub fn attach(&self, activator: &Activator) {
        let log = self.clone();
        activator.set_license_callback(move |report| {
            log.count.fetch_add(1, Ordering::SeqCst);
            log.reports.lock().unwrap().push(report);
        });
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<tollgate_license::StatusReport> {
        self.reports.lock().unwrap().last().cloned()
    }
}
