//! Meter attribute ledger.
//!
//! Local counters are seeded from the last verified token and staged in
//! memory. They are advisory: only a server sync or offline response can
//! produce a signed token, and when one arrives its values replace the local
//! ones. The last-synced `allowed_uses` is the ceiling until then.

use crate::error::{LicenseError, LicenseResult};
use crate::token::{MeterAttribute, TokenPayload};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Counter {
    allowed_uses: u64,
    total_uses: u64,
}

/// Thread-safe per-attribute usage counters.
#[derive(Debug, Default)]
pub struct MeterLedger {
    counters: Mutex<BTreeMap<String, Counter>>,
}

impl MeterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> MutexGuard<'_, BTreeMap<String, Counter>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the current allowed/total uses of an attribute.
    pub fn get(&self, name: &str) -> LicenseResult<MeterAttribute> {
        self.counters()
            .get(name)
            .map(|c| MeterAttribute {
                name: name.to_string(),
                allowed_uses: c.allowed_uses,
                total_uses: c.total_uses,
            })
            .ok_or_else(|| LicenseError::MeterAttributeNotFound(name.to_string()))
    }

    /// Adds `delta` uses, failing without any change if that would exceed
    /// the allowed uses.
    pub fn increment(&self, name: &str, delta: u64) -> LicenseResult<MeterAttribute> {
        let mut counters = self.counters();
        let counter = counters
            .get_mut(name)
            .ok_or_else(|| LicenseError::MeterAttributeNotFound(name.to_string()))?;

        let next = counter
            .total_uses
            .checked_add(delta)
            .filter(|next| *next <= counter.allowed_uses)
            .ok_or_else(|| LicenseError::MeterAttributeLimitReached {
                name: name.to_string(),
                allowed: counter.allowed_uses,
            })?;
        counter.total_uses = next;

        debug!("meter {name} incremented by {delta} to {next}");
        Ok(MeterAttribute {
            name: name.to_string(),
            allowed_uses: counter.allowed_uses,
            total_uses: next,
        })
    }

    /// Removes `delta` uses, stopping at zero.
    pub fn decrement(&self, name: &str, delta: u64) -> LicenseResult<MeterAttribute> {
        let mut counters = self.counters();
        let counter = counters
            .get_mut(name)
            .ok_or_else(|| LicenseError::MeterAttributeNotFound(name.to_string()))?;
        counter.total_uses = counter.total_uses.saturating_sub(delta);

        Ok(MeterAttribute {
            name: name.to_string(),
            allowed_uses: counter.allowed_uses,
            total_uses: counter.total_uses,
        })
    }

    /// Sets an attribute's uses back to zero.
    pub fn reset(&self, name: &str) -> LicenseResult<()> {
        let mut counters = self.counters();
        let counter = counters
            .get_mut(name)
            .ok_or_else(|| LicenseError::MeterAttributeNotFound(name.to_string()))?;
        counter.total_uses = 0;
        Ok(())
    }

    /// Returns every attribute with its local total, for the next sync or
    /// offline request.
    #[must_use]
    pub fn pending_uses(&self) -> Vec<MeterAttribute> {
        self.counters()
            .iter()
            .map(|(name, c)| MeterAttribute {
                name: name.clone(),
                allowed_uses: c.allowed_uses,
                total_uses: c.total_uses,
            })
            .collect()
    }

    /// Replaces all counters with the server's values from `payload`.
    pub fn replace_from(&self, payload: &TokenPayload) {
        let fresh = payload
            .meter_attributes
            .iter()
            .map(|m| {
                (
                    m.name.clone(),
                    Counter {
                        allowed_uses: m.allowed_uses,
                        total_uses: m.total_uses,
                    },
                )
            })
            .collect();
        *self.counters() = fresh;
    }

    /// Drops every counter.
    pub fn clear(&self) {
        self.counters().clear();
    }
}
