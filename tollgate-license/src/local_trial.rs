//! Local (unverified) trials.
//!
//! A local trial is only an expiry date written next to the other client
//! state, with no signature and no server involvement. Anyone who can change
//! the system clock or edit the file can extend it; it is a best-effort
//! convenience for applications that do not want server-issued trials.
//!
//! It deliberately has its own slot and its own checks: nothing here touches
//! the signed token path.

use crate::clock::Clock;
use crate::error::{LicenseError, LicenseResult};
use crate::storage::{Slot, SlotStorage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Outcome of a local-trial check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalTrialStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LocalTrialRecord {
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct LocalTrial {
    storage: Arc<dyn SlotStorage>,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl LocalTrial {
    pub fn new(storage: Arc<dyn SlotStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> LicenseResult<Option<LocalTrialRecord>> {
        match self.storage.read(Slot::LocalTrial)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &LocalTrialRecord) -> LicenseResult<()> {
        self.storage
            .write(Slot::LocalTrial, &serde_json::to_string(record)?)
    }

    fn status_of(&self, record: &LocalTrialRecord) -> LocalTrialStatus {
        if self.clock.now() > record.expires_at {
            LocalTrialStatus::Expired
        } else {
            LocalTrialStatus::Active
        }
    }

    /// Starts a trial of `days` days. Starting again keeps the original
    /// expiry and just reports its status.
    pub fn activate(&self, days: u32) -> LicenseResult<LocalTrialStatus> {
        if days == 0 {
            return Err(LicenseError::InvalidArgument(
                "trial length must be at least one day".to_string(),
            ));
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = self.read()? {
            return Ok(self.status_of(&existing));
        }

        let now = self.clock.now();
        let record = LocalTrialRecord {
            started_at: now,
            expires_at: now + Duration::days(i64::from(days)),
        };
        self.write(&record)?;

        info!("local trial started, expires {}", record.expires_at);
        Ok(LocalTrialStatus::Active)
    }

    /// Compares the stored expiry against the current clock.
    pub fn is_genuine(&self) -> LicenseResult<LocalTrialStatus> {
        let record = self.read()?.ok_or(LicenseError::TrialNotStarted)?;
        Ok(self.status_of(&record))
    }

    /// Pushes the expiry out by `days` and returns the new expiry.
    pub fn extend(&self, days: u32) -> LicenseResult<DateTime<Utc>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut record = self.read()?.ok_or(LicenseError::TrialNotStarted)?;
        record.expires_at += Duration::days(i64::from(days));
        self.write(&record)?;

        info!("local trial extended by {days} days to {}", record.expires_at);
        Ok(record.expires_at)
    }

    /// Returns the stored expiry.
    pub fn expiry(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.read()?.ok_or(LicenseError::TrialNotStarted)?.expires_at)
    }
}
