//! Clock-rollback detection.
//!
//! The watermark is the highest wall-clock time the client has ever
//! observed, including the issue time of every verified token (which comes
//! from the server's clock). If "now" is ever earlier than the watermark by
//! more than [`CLOCK_TOLERANCE_SECS`], the clock was turned back.

use crate::error::{LicenseError, LicenseResult};
use crate::storage::{Slot, SlotStorage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Allowed backwards drift before the clock counts as tampered (5 minutes).
pub const CLOCK_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Serialize, Deserialize)]
struct WatermarkRecord {
    max_seen: DateTime<Utc>,
}

/// Persisted "maximum time observed" watermark.
pub struct Watermark {
    storage: Arc<dyn SlotStorage>,
    // Serializes read-compare-write so two verifications never regress it.
    lock: Mutex<()>,
}

impl Watermark {
    pub fn new(storage: Arc<dyn SlotStorage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Returns the stored watermark, if any.
    pub fn current(&self) -> LicenseResult<Option<DateTime<Utc>>> {
        match self.storage.read(Slot::Watermark)? {
            Some(json) => {
                let record: WatermarkRecord = serde_json::from_str(&json)?;
                Ok(Some(record.max_seen))
            }
            None => Ok(None),
        }
    }

    /// Fails with [`LicenseError::ClockTamper`] if `now` lies before the
    /// watermark by more than the tolerance.
    pub fn check(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        if let Some(max_seen) = self.current()? {
            if max_seen > now + Duration::seconds(CLOCK_TOLERANCE_SECS) {
                warn!("clock rollback detected: now {now} is before watermark {max_seen}");
                return Err(LicenseError::ClockTamper);
            }
        }
        Ok(())
    }

    /// Raises the watermark to `seen` if it is higher.
    pub fn observe(&self, seen: DateTime<Utc>) -> LicenseResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.current()?.is_some_and(|max| max >= seen) {
            return Ok(());
        }
        let json = serde_json::to_string(&WatermarkRecord { max_seen: seen })?;
        self.storage.write(Slot::Watermark, &json)
    }
}
