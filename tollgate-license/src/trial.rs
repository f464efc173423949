//! Verified (server-issued) trials.
//!
//! A verified trial is a signed token of kind `trial`, stored in its own slot
//! and verified exactly like a license token. It carries no activation-count
//! semantics and no sync bookkeeping.

use crate::error::{LicenseError, LicenseResult};
use crate::storage::{Slot, SlotStorage, TokenStore};
use crate::token::{TokenKind, VerifiedToken};
use crate::verify::TokenVerifier;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

/// Outcome of a verified-trial check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Active,
    Expired,
}

pub struct TrialSession {
    verifier: TokenVerifier,
    store: TokenStore,
    current: RwLock<Option<Arc<VerifiedToken>>>,
    swap_lock: Mutex<()>,
}

impl TrialSession {
    pub fn new(verifier: TokenVerifier, storage: Arc<dyn SlotStorage>) -> Self {
        Self {
            verifier,
            store: TokenStore::new(storage, Slot::Trial),
            current: RwLock::new(None),
            swap_lock: Mutex::new(()),
        }
    }

    /// Returns the current trial token, loading it from storage on first use.
    pub fn require(&self) -> LicenseResult<Arc<VerifiedToken>> {
        if let Some(token) = self.current.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(token);
        }
        let raw = self.store.load()?.ok_or(LicenseError::TrialNotStarted)?;
        let token = Arc::new(self.verifier.verify_kind(&raw, TokenKind::Trial)?);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(token)
    }

    /// Verifies and stores a trial token. On any error nothing changes.
    pub fn replace(&self, raw: &str) -> LicenseResult<Arc<VerifiedToken>> {
        let token = Arc::new(self.verifier.verify_kind(raw, TokenKind::Trial)?);

        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store.save(token.raw())?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        info!(
            "verified trial {} stored",
            token.payload().trial_id.as_deref().unwrap_or("-")
        );
        Ok(token)
    }

    /// Re-verifies the trial token and checks its expiry.
    pub fn status(&self) -> LicenseResult<TrialStatus> {
        let token = self.require()?;
        let token = self.verifier.verify_kind(token.raw(), TokenKind::Trial)?;
        if token.payload().is_expired_at(self.verifier.clock().now()) {
            Ok(TrialStatus::Expired)
        } else {
            Ok(TrialStatus::Active)
        }
    }

    /// Erases the trial token.
    pub fn clear(&self) -> LicenseResult<()> {
        let _guard = self.swap_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store.clear()?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
