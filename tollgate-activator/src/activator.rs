//! The activation engine facade.
//!
//! [`Activator`] wires the license core to a transport and a background sync
//! scheduler and exposes the operations an application calls: activation
//! (online and offline), genuineness checks, trials, meter attributes and
//! read-only queries over the current token.

use crate::api_client::HttpTransport;
use crate::config::InitContext;
use crate::error::{ActivatorError, ActivatorResult};
use crate::sync_engine::{CallbackSlot, StatusCallback, SyncCore, SyncHandle, create_sync_engine};
use crate::transport::LicenseTransport;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tollgate_license::{
    ActivationSession, Clock, DeviceInfo, Fingerprinter, HostFingerprinter, LicenseError,
    LicenseState, LicenseType, LocalTrial, LocalTrialStatus, MeterAttribute, OfflineKind,
    OfflineOutcome, OfflineProtocol, Product, SlotStorage, StatusReport, SystemClock,
    TokenVerifier, TrialSession, TrialStatus, VerifiedToken, Watermark,
};
use tracing::{debug, info, warn};

pub struct Activator {
    product: Arc<Product>,
    verifier: TokenVerifier,
    session: Arc<ActivationSession>,
    trial: TrialSession,
    local_trial: LocalTrial,
    offline: OfflineProtocol,
    transport: Arc<dyn LicenseTransport>,
    license_key: RwLock<Option<String>>,
    user_credential: Option<UserCredential>,
    activation_metadata: BTreeMap<String, String>,
    trial_activation_metadata: BTreeMap<String, String>,
    app_version: Option<String>,
    callback: CallbackSlot,
    core: Arc<SyncCore>,
    scheduler: Mutex<Option<SyncHandle>>,
}

impl Activator {
    /// Creates an activator talking to the configured license server.
    pub fn new(ctx: InitContext) -> ActivatorResult<Self> {
        let transport = HttpTransport::new(ctx.server.clone())?;
        Self::with_components(
            ctx,
            Arc::new(transport),
            Arc::new(HostFingerprinter),
            Arc::new(SystemClock),
        )
    }

    /// Creates an activator with an explicit transport, machine identity
    /// and clock.
    pub fn with_components(
        ctx: InitContext,
        transport: Arc<dyn LicenseTransport>,
        fingerprinter: Arc<dyn Fingerprinter>,
        clock: Arc<dyn Clock>,
    ) -> ActivatorResult<Self> {
        ctx.validate()?;
        let product = Arc::new(ctx.load_product()?);
        let storage: Arc<dyn SlotStorage> = ctx.open_storage(product.product_id())?;

        let watermark = Arc::new(Watermark::new(storage.clone()));
        let verifier = TokenVerifier::new(product.clone(), fingerprinter, watermark, clock.clone());
        let session = Arc::new(ActivationSession::new(
            verifier.clone(),
            storage.clone(),
            ctx.grace_boundary,
        ));
        let callback: CallbackSlot = Arc::new(RwLock::new(None));
        let core = Arc::new(SyncCore::new(
            session.clone(),
            transport.clone(),
            callback.clone(),
            ctx.app_version.clone(),
            Duration::from_secs(ctx.server.min_sync_interval_secs),
        ));

        info!("activator ready for product {}", product.product_id());
        Ok(Self {
            trial: TrialSession::new(verifier.clone(), storage.clone()),
            local_trial: LocalTrial::new(storage.clone(), clock),
            offline: OfflineProtocol::new(verifier.clone(), storage),
            product,
            verifier,
            session,
            transport,
            license_key: RwLock::new(ctx.license_key),
            user_credential: ctx.license_user_credential,
            activation_metadata: ctx.activation_metadata,
            trial_activation_metadata: ctx.trial_activation_metadata,
            app_version: ctx.app_version,
            callback,
            core,
            scheduler: Mutex::new(None),
        })
    }

    // ── Configuration ──

    /// Sets the license key used by the next online or offline activation.
    pub fn set_license_key(&self, key: &str) -> ActivatorResult<()> {
        if key.trim().is_empty() {
            return Err(LicenseError::InvalidArgument("license key is empty".to_string()).into());
        }
        *self.license_key.write().unwrap_or_else(|e| e.into_inner()) = Some(key.trim().to_string());
        Ok(())
    }

    /// Registers the callback that receives every sync cycle's outcome.
    pub fn set_license_callback(&self, callback: impl Fn(StatusReport) + Send + Sync + 'static) {
        let callback: StatusCallback = Arc::new(callback);
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Records meter attribute uses to embed in the next offline activation
    /// request.
    pub fn set_offline_activation_request_meter_attribute_uses(
        &self,
        name: &str,
        uses: u64,
    ) -> ActivatorResult<()> {
        Ok(self.offline.set_meter_attribute_uses(name, uses)?)
    }

    fn configured_license_key(&self) -> ActivatorResult<String> {
        self.license_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| LicenseError::LicenseKeyNotSet.into())
    }

    // ── Scheduler ──

    fn ensure_scheduler(&self) {
        let mut slot = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(SyncHandle::is_running) {
            return;
        }
        if self.core.next_interval().is_none() {
            debug!("activation does not use background sync");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, background sync not started");
            return;
        };

        let (handle, engine) = create_sync_engine(self.core.clone());
        runtime.spawn(engine.run());
        *slot = Some(handle);
    }

    async fn stop_scheduler(&self) {
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // Already stopped is fine.
            let _ = handle.stop().await;
        }
    }

    /// Returns true while the background sync task is running.
    pub fn is_sync_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(SyncHandle::is_running)
    }

    /// Syncs with the server now and returns the resulting status. Joins a
    /// cycle that is already in flight instead of starting another.
    pub async fn sync_now(&self) -> ActivatorResult<StatusReport> {
        self.session.require()?;

        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(SyncHandle::is_running);
        if let Some(handle) = handle {
            match handle.sync_now().await {
                Err(ActivatorError::SchedulerStopped) => {}
                other => return other,
            }
        }

        Ok(self.core.run_shared_cycle().await)
    }

    // ── License ──

    /// Activates the configured license key with the server.
    pub async fn activate_license(&self) -> ActivatorResult<LicenseState> {
        let license_key = self.configured_license_key()?;
        let request = ActivationRequest {
            product_id: self.product.product_id().to_string(),
            license_key,
            fingerprint: self.verifier.fingerprint(),
            metadata: self.activation_metadata.clone(),
            meter_attributes: Vec::new(),
            app_version: self.app_version.clone(),
            device: DeviceInfo::collect(),
            user_credential: self.user_credential.clone(),
        };

        let raw = self.transport.activate(&request).await?;
        let token = self.session.replace(&raw)?;
        info!("license activated ({})", token.payload().activation_id);

        self.ensure_scheduler();
        Ok(self.session.state())
    }

    /// Writes an offline activation request for the configured license key.
    pub fn generate_offline_activation_request(&self, path: impl AsRef<Path>) -> ActivatorResult<()> {
        let license_key = self.configured_license_key()?;
        let blob = self.offline.activation_request(
            &license_key,
            self.activation_metadata.clone(),
            self.app_version.clone(),
        )?;
        write_offline_file(path.as_ref(), &blob)
    }

    /// Consumes an offline activation response file.
    pub fn activate_license_offline(&self, path: impl AsRef<Path>) -> ActivatorResult<LicenseState> {
        let blob = read_offline_file(path.as_ref())?;
        self.expect_response_kind(&blob, OfflineKind::Activation)?;
        match self.offline.consume(&blob, &self.session, &self.trial)? {
            OfflineOutcome::Activated(_) => Ok(self.session.state()),
            _ => Err(LicenseError::StaleOrForeignResponse.into()),
        }
    }

    /// Releases the activation on the server, then erases it locally.
    pub async fn deactivate_license(&self) -> ActivatorResult<()> {
        let token = self.session.require()?;
        let request = DeactivationRequest {
            product_id: token.payload().product_id.clone(),
            activation_id: token.payload().activation_id.clone(),
            fingerprint: self.verifier.fingerprint(),
        };

        self.transport.deactivate(&request).await?;
        self.stop_scheduler().await;
        self.session.clear()?;
        info!("license deactivated ({})", request.activation_id);
        Ok(())
    }

    /// Writes an offline deactivation request for the current activation.
    pub fn generate_offline_deactivation_request(&self, path: impl AsRef<Path>) -> ActivatorResult<()> {
        let blob = self.offline.deactivation_request(&self.session)?;
        write_offline_file(path.as_ref(), &blob)
    }

    /// Consumes an offline deactivation response file, erasing the
    /// activation.
    pub async fn deactivate_license_offline(&self, path: impl AsRef<Path>) -> ActivatorResult<()> {
        let blob = read_offline_file(path.as_ref())?;
        self.expect_response_kind(&blob, OfflineKind::Deactivation)?;
        match self.offline.consume(&blob, &self.session, &self.trial)? {
            OfflineOutcome::Deactivated { activation_id } => {
                self.stop_scheduler().await;
                info!("license deactivated offline ({activation_id})");
                Ok(())
            }
            _ => Err(LicenseError::StaleOrForeignResponse.into()),
        }
    }

    /// Verifies the activation locally, derives its state and makes sure
    /// background sync is running.
    pub fn is_license_genuine(&self) -> ActivatorResult<LicenseState> {
        match self.session.require() {
            Ok(_) => {}
            Err(LicenseError::NotActivated) => return Err(LicenseError::NotActivated.into()),
            Err(e) => {
                warn!("stored activation failed verification: {e}");
                return Ok(LicenseState::Failed);
            }
        }

        let state = self.session.state();
        if state != LicenseState::Failed {
            self.ensure_scheduler();
        }
        Ok(state)
    }

    /// Like [`Activator::is_license_genuine`] but purely local: never starts
    /// background sync.
    pub fn is_license_valid(&self) -> ActivatorResult<LicenseState> {
        match self.session.require() {
            Ok(_) => Ok(self.session.state()),
            Err(LicenseError::NotActivated) => Err(LicenseError::NotActivated.into()),
            Err(_) => Ok(LicenseState::Failed),
        }
    }

    /// Returns the current state with its reason.
    pub fn status(&self) -> StatusReport {
        self.session.evaluate()
    }

    // ── Trials ──

    /// Starts a verified trial with the server.
    pub async fn activate_trial(&self) -> ActivatorResult<TrialStatus> {
        let request = TrialRequest {
            product_id: self.product.product_id().to_string(),
            fingerprint: self.verifier.fingerprint(),
            metadata: self.trial_activation_metadata.clone(),
            app_version: self.app_version.clone(),
            device: DeviceInfo::collect(),
        };

        let raw = self.transport.activate_trial(&request).await?;
        self.trial.replace(&raw)?;
        Ok(self.trial.status()?)
    }

    /// Writes an offline verified-trial request.
    pub fn generate_offline_trial_activation_request(
        &self,
        path: impl AsRef<Path>,
    ) -> ActivatorResult<()> {
        let blob = self
            .offline
            .trial_request(self.trial_activation_metadata.clone(), self.app_version.clone())?;
        write_offline_file(path.as_ref(), &blob)
    }

    /// Consumes an offline verified-trial response file.
    pub fn activate_trial_offline(&self, path: impl AsRef<Path>) -> ActivatorResult<TrialStatus> {
        let blob = read_offline_file(path.as_ref())?;
        self.expect_response_kind(&blob, OfflineKind::Trial)?;
        match self.offline.consume(&blob, &self.session, &self.trial)? {
            OfflineOutcome::TrialActivated(_) => Ok(self.trial.status()?),
            _ => Err(LicenseError::StaleOrForeignResponse.into()),
        }
    }

    /// Re-verifies the verified trial and checks its expiry.
    pub fn is_trial_genuine(&self) -> ActivatorResult<TrialStatus> {
        Ok(self.trial.status()?)
    }

    /// Starts a local trial of `days` days.
    pub fn activate_local_trial(&self, days: u32) -> ActivatorResult<LocalTrialStatus> {
        Ok(self.local_trial.activate(days)?)
    }

    pub fn is_local_trial_genuine(&self) -> ActivatorResult<LocalTrialStatus> {
        Ok(self.local_trial.is_genuine()?)
    }

    /// Pushes the local trial expiry out by `days`.
    pub fn extend_local_trial(&self, days: u32) -> ActivatorResult<DateTime<Utc>> {
        Ok(self.local_trial.extend(days)?)
    }

    // ── Meter attributes ──

    pub fn increment_activation_meter_attribute_uses(
        &self,
        name: &str,
        uses: u64,
    ) -> ActivatorResult<MeterAttribute> {
        self.session.require()?;
        Ok(self.session.ledger().increment(name, uses)?)
    }

    pub fn decrement_activation_meter_attribute_uses(
        &self,
        name: &str,
        uses: u64,
    ) -> ActivatorResult<MeterAttribute> {
        self.session.require()?;
        Ok(self.session.ledger().decrement(name, uses)?)
    }

    pub fn reset_activation_meter_attribute_uses(&self, name: &str) -> ActivatorResult<()> {
        self.session.require()?;
        Ok(self.session.ledger().reset(name)?)
    }

    /// Returns the attribute as last signed by the server.
    pub fn license_meter_attribute(&self, name: &str) -> ActivatorResult<MeterAttribute> {
        let token = self.session.require()?;
        token
            .payload()
            .meter_attribute(name)
            .cloned()
            .ok_or_else(|| LicenseError::MeterAttributeNotFound(name.to_string()).into())
    }

    /// Returns the local use count, including uses not yet synced.
    pub fn activation_meter_attribute_uses(&self, name: &str) -> ActivatorResult<u64> {
        self.session.require()?;
        Ok(self.session.ledger().get(name)?.total_uses)
    }

    // ── Queries ──

    fn license_token(&self) -> ActivatorResult<Arc<VerifiedToken>> {
        Ok(self.session.require()?)
    }

    pub fn product_metadata(&self, key: &str) -> ActivatorResult<String> {
        Ok(self.product.metadata(key)?.to_string())
    }

    pub fn license_metadata(&self, key: &str) -> ActivatorResult<String> {
        Ok(self.license_token()?.license_metadata(key)?.to_string())
    }

    /// Returns the activated license key, or the configured one before
    /// activation.
    pub fn license_key(&self) -> ActivatorResult<String> {
        if let Some(key) = self
            .session
            .require()
            .ok()
            .and_then(|t| t.payload().license_key.clone())
        {
            return Ok(key);
        }
        self.configured_license_key()
    }

    /// Returns the license expiry, `None` for perpetual licenses.
    pub fn license_expiry_date(&self) -> ActivatorResult<Option<DateTime<Utc>>> {
        Ok(self.license_token()?.payload().expires_at)
    }

    pub fn license_user_email(&self) -> ActivatorResult<String> {
        self.with_user(|u| Ok(u.email.clone()))
    }

    pub fn license_user_name(&self) -> ActivatorResult<String> {
        self.with_user(|u| Ok(u.name.clone()))
    }

    pub fn license_user_company(&self) -> ActivatorResult<String> {
        self.with_user(|u| Ok(u.company.clone()))
    }

    pub fn license_user_metadata(&self, key: &str) -> ActivatorResult<String> {
        self.with_user(|u| {
            u.metadata
                .get(key)
                .cloned()
                .ok_or_else(|| LicenseError::MetadataNotFound(key.to_string()).into())
        })
    }

    fn with_user<T>(
        &self,
        f: impl FnOnce(&tollgate_license::LicenseUser) -> ActivatorResult<T>,
    ) -> ActivatorResult<T> {
        let token = self.license_token()?;
        let user = token
            .user()
            .ok_or_else(|| LicenseError::MetadataNotFound("user".to_string()))?;
        f(user)
    }

    pub fn license_type(&self) -> ActivatorResult<LicenseType> {
        self.license_token()?
            .payload()
            .license_type
            .ok_or_else(|| LicenseError::MetadataNotFound("license_type".to_string()).into())
    }

    pub fn activation_metadata(&self, key: &str) -> ActivatorResult<String> {
        Ok(self.license_token()?.metadata(key)?.to_string())
    }

    /// Returns when the grace window closes if syncs keep failing.
    pub fn server_sync_grace_period_expiry_date(&self) -> ActivatorResult<DateTime<Utc>> {
        let token = self.license_token()?;
        Ok(match self.session.sync_state() {
            Some(sync) => sync.grace_period_expiry(),
            None => token.grace_period_expiry(token.payload().issued_at),
        })
    }

    pub fn trial_activation_metadata(&self, key: &str) -> ActivatorResult<String> {
        Ok(self.trial.require()?.metadata(key)?.to_string())
    }

    pub fn trial_expiry_date(&self) -> ActivatorResult<Option<DateTime<Utc>>> {
        Ok(self.trial.require()?.payload().expires_at)
    }

    pub fn trial_id(&self) -> ActivatorResult<String> {
        self.trial
            .require()?
            .payload()
            .trial_id
            .clone()
            .ok_or_else(|| LicenseError::InvalidPayload("trial token without trial id".to_string()).into())
    }

    pub fn local_trial_expiry_date(&self) -> ActivatorResult<DateTime<Utc>> {
        Ok(self.local_trial.expiry()?)
    }

    // ── Reset ──

    /// Stops background sync and erases the activation, the verified trial,
    /// sync bookkeeping and any pending offline request. The local trial and
    /// the clock watermark are kept.
    pub async fn reset(&self) -> ActivatorResult<()> {
        self.stop_scheduler().await;
        self.session.clear()?;
        self.trial.clear()?;
        self.offline.clear()?;
        info!("activation data reset");
        Ok(())
    }

    fn expect_response_kind(&self, blob: &str, kind: OfflineKind) -> ActivatorResult<()> {
        let response = self.offline.open_response(blob)?;
        if response.kind != kind {
            warn!("expected an offline {kind:?} response, got {:?}", response.kind);
            return Err(LicenseError::StaleOrForeignResponse.into());
        }
        Ok(())
    }
}

fn read_offline_file(path: &Path) -> ActivatorResult<String> {
    if !path.is_file() {
        return Err(LicenseError::InvalidPath(path.display().to_string()).into());
    }
    Ok(std::fs::read_to_string(path)?)
}

fn write_offline_file(path: &Path, blob: &str) -> ActivatorResult<()> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Err(LicenseError::InvalidPath(path.display().to_string()).into());
    }
    std::fs::write(path, blob)?;
    debug!("offline request written to {}", path.display());
    Ok(())
}
