//! The live license activation.
//!
//! `ActivationSession` owns the one mutable thing in the client: the current
//! verified token and the sync bookkeeping that goes with it.
//!
//! - Readers clone an `Arc` under a short read lock and never wait on the
//!   network.
//! - Every replacement (sync, offline response, activation) verifies first,
//!   then persists and swaps under a single swap mutex, so concurrent writers
//!   serialize and readers see the whole old token or the whole new one.
//! - Each clear starts a new epoch. A sync that began before the clear
//!   carries the old epoch and can no longer commit.
//! - The persisted sync bookkeeping is not signed, so its grace window is
//!   anchored to the token's server-signed issue time.

use crate::error::{LicenseError, LicenseResult};
use crate::meter::MeterLedger;
use crate::state::{GraceBoundary, LicenseState, StatusReport, SyncState, derive_report};
use crate::storage::{Slot, SlotStorage, TokenStore};
use crate::token::{TokenKind, VerifiedToken};
use crate::verify::TokenVerifier;
use crate::watermark::CLOCK_TOLERANCE_SECS;
use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct ActivationSession {
    verifier: TokenVerifier,
    store: TokenStore,
    storage: Arc<dyn SlotStorage>,
    ledger: MeterLedger,
    current: RwLock<Option<Arc<VerifiedToken>>>,
    sync_state: Mutex<Option<SyncState>>,
    swap_lock: Mutex<()>,
    epoch: AtomicU64,
    boundary: GraceBoundary,
}

/// Caps stored bookkeeping at what the token itself vouches for: a sync
/// cannot have succeeded after the server signed the current token.
fn anchor(mut sync: SyncState, token: &VerifiedToken) -> SyncState {
    let payload = token.payload();
    let ceiling = payload.issued_at + Duration::seconds(CLOCK_TOLERANCE_SECS);
    if sync.last_successful_sync > ceiling {
        sync.last_successful_sync = ceiling;
    }
    sync.grace_period_days = payload.server_sync_grace_period_days;
    sync
}

impl ActivationSession {
    pub fn new(
        verifier: TokenVerifier,
        storage: Arc<dyn SlotStorage>,
        boundary: GraceBoundary,
    ) -> Self {
        Self {
            verifier,
            store: TokenStore::new(storage.clone(), Slot::Activation),
            storage,
            ledger: MeterLedger::new(),
            current: RwLock::new(None),
            sync_state: Mutex::new(None),
            swap_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            boundary,
        }
    }

    /// Returns the verifier used for every replacement.
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Returns the meter ledger seeded from the current token.
    #[must_use]
    pub fn ledger(&self) -> &MeterLedger {
        &self.ledger
    }

    /// Returns the in-memory token without touching storage.
    #[must_use]
    pub fn current(&self) -> Option<Arc<VerifiedToken>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the current token, loading it from storage on first use.
    pub fn require(&self) -> LicenseResult<Arc<VerifiedToken>> {
        match self.current() {
            Some(token) => Ok(token),
            None => self.load()?.ok_or(LicenseError::NotActivated),
        }
    }

    /// Loads and verifies the persisted token.
    ///
    /// Returns `Ok(None)` if nothing is stored. A stored token that fails
    /// verification is an error and is not adopted.
    pub fn load(&self) -> LicenseResult<Option<Arc<VerifiedToken>>> {
        let Some(raw) = self.store.load()? else {
            return Ok(None);
        };
        let token = Arc::new(self.verifier.verify_kind(&raw, TokenKind::License)?);

        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        let sync = match self.storage.read(Slot::SyncState)? {
            Some(json) => {
                let stored: SyncState = serde_json::from_str(&json)?;
                let sync = anchor(stored, &token);
                if sync != stored {
                    warn!("stored sync state disagrees with the token, grace window re-anchored");
                }
                sync
            }
            None => SyncState::synced_at(
                token.payload().issued_at,
                token.payload().server_sync_grace_period_days,
            ),
        };
        *self.sync_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(sync);
        self.ledger.replace_from(token.payload());
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        debug!("loaded activation {}", token.payload().activation_id);
        Ok(Some(token))
    }

    /// Verifies `raw` and makes it the current token, counting as a
    /// successful server sync. On any error nothing changes.
    pub fn replace(&self, raw: &str) -> LicenseResult<Arc<VerifiedToken>> {
        let token = Arc::new(self.verifier.verify_kind(raw, TokenKind::License)?);
        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.commit(token)
    }

    /// Returns the current epoch. Pass it to [`ActivationSession::refresh`]
    /// to make sure a sync result still belongs to this activation.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Like [`ActivationSession::replace`], for a server sync that started
    /// in `epoch`. Fails with [`LicenseError::NotActivated`] if the
    /// activation was cleared since, and with
    /// [`LicenseError::ActivationMismatch`] if `raw` belongs to another
    /// activation.
    pub fn refresh(&self, raw: &str, epoch: u64) -> LicenseResult<Arc<VerifiedToken>> {
        let token = Arc::new(self.verifier.verify_kind(raw, TokenKind::License)?);
        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.epoch() != epoch {
            warn!("activation was cleared during sync, dropping the server response");
            return Err(LicenseError::NotActivated);
        }
        let current = self.current().ok_or(LicenseError::NotActivated)?;
        let expected = &current.payload().activation_id;
        let found = &token.payload().activation_id;
        if expected != found {
            return Err(LicenseError::ActivationMismatch {
                expected: expected.clone(),
                found: found.clone(),
            });
        }
        self.commit(token)
    }

    // Caller holds the swap lock.
    fn commit(&self, token: Arc<VerifiedToken>) -> LicenseResult<Arc<VerifiedToken>> {
        let now = self.verifier.clock().now();
        let sync = anchor(
            SyncState::synced_at(now, token.payload().server_sync_grace_period_days),
            &token,
        );

        self.store.save(token.raw())?;
        self.storage
            .write(Slot::SyncState, &serde_json::to_string(&sync)?)?;

        *self.sync_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(sync);
        self.ledger.replace_from(token.payload());
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        info!("activation {} replaced", token.payload().activation_id);
        Ok(token)
    }

    /// Records a failed sync and returns the updated bookkeeping.
    pub fn record_sync_failure(&self) -> LicenseResult<SyncState> {
        let token = self.require()?;

        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.current().is_none() {
            // Cleared while the failed sync was in flight.
            return Err(LicenseError::NotActivated);
        }
        let mut slot = self.sync_state.lock().unwrap_or_else(|e| e.into_inner());
        let mut sync = (*slot).unwrap_or_else(|| {
            SyncState::synced_at(
                token.payload().issued_at,
                token.payload().server_sync_grace_period_days,
            )
        });
        sync.record_failure();
        self.storage
            .write(Slot::SyncState, &serde_json::to_string(&sync)?)?;
        *slot = Some(sync);

        warn!(
            "server sync failed ({} consecutive), grace period ends {}",
            sync.consecutive_failures,
            sync.grace_period_expiry()
        );
        Ok(sync)
    }

    /// Returns the sync bookkeeping for the current token.
    #[must_use]
    pub fn sync_state(&self) -> Option<SyncState> {
        *self.sync_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-verifies the current token locally and derives its state.
    ///
    /// Re-verification repeats the fingerprint and clock checks, so moving
    /// the token to another machine or turning the clock back is caught on
    /// every call, not just at load.
    #[must_use]
    pub fn evaluate(&self) -> StatusReport {
        let token = match self.require() {
            Ok(token) => token,
            Err(e) => return StatusReport::failed(e.to_string()),
        };
        let verification = self.verifier.verify_kind(token.raw(), TokenKind::License);
        let sync = self.sync_state().unwrap_or_else(|| {
            SyncState::synced_at(
                token.payload().issued_at,
                token.payload().server_sync_grace_period_days,
            )
        });
        let now = self.verifier.clock().now();

        derive_report(
            verification.as_ref().map(VerifiedToken::payload),
            now,
            &sync,
            self.boundary,
        )
    }

    /// Shorthand for `evaluate().state`.
    #[must_use]
    pub fn state(&self) -> LicenseState {
        self.evaluate().state
    }

    /// Erases the activation and its sync bookkeeping.
    pub fn clear(&self) -> LicenseResult<()> {
        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.clear()?;
        self.storage.remove(Slot::SyncState)?;
        *self.sync_state.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.ledger.clear();

        info!("activation cleared");
        Ok(())
    }
}
