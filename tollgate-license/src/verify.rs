//! Token verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. Ed25519 signature under the product key
//! 2. product id
//! 3. machine fingerprint
//! 4. clock watermark (and the token's own issue time)
//!
//! A token that passes raises the watermark.

use crate::clock::Clock;
use crate::device::Fingerprinter;
use crate::envelope;
use crate::error::{LicenseError, LicenseResult};
use crate::product::Product;
use crate::token::{TokenKind, TokenPayload, VerifiedToken};
use crate::watermark::{CLOCK_TOLERANCE_SECS, Watermark};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

/// Verifies an envelope's signature against the product key and decodes its
/// payload, without any machine, clock or persistence checks.
pub fn decode_token(raw: &str, product: &Product) -> LicenseResult<TokenPayload> {
    let bytes = envelope::open(raw, &product.verifying_key()?)?;
    TokenPayload::from_slice(&bytes)
}

/// Full verifier bound to one product, machine, watermark and clock.
#[derive(Clone)]
pub struct TokenVerifier {
    product: Arc<Product>,
    fingerprinter: Arc<dyn Fingerprinter>,
    watermark: Arc<Watermark>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(
        product: Arc<Product>,
        fingerprinter: Arc<dyn Fingerprinter>,
        watermark: Arc<Watermark>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            product,
            fingerprinter,
            watermark,
            clock,
        }
    }

    /// Returns the product this verifier checks against.
    #[must_use]
    pub fn product(&self) -> &Arc<Product> {
        &self.product
    }

    /// Returns the current machine fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.fingerprinter.fingerprint()
    }

    /// Returns the verifier's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs every check on `raw` and, on success, advances the watermark.
    pub fn verify(&self, raw: &str) -> LicenseResult<VerifiedToken> {
        let payload = decode_token(raw, &self.product)?;

        if payload.product_id != self.product.product_id() {
            return Err(LicenseError::ProductMismatch {
                expected: self.product.product_id().to_string(),
                found: payload.product_id,
            });
        }

        if payload.fingerprint != self.fingerprinter.fingerprint() {
            warn!("token {} is pinned to another machine", payload.activation_id);
            return Err(LicenseError::MachineFingerprint);
        }

        let now = self.clock.now();
        self.watermark.check(now)?;
        if payload.issued_at > now + Duration::seconds(CLOCK_TOLERANCE_SECS) {
            warn!(
                "token {} issued at {} which is ahead of local time {now}",
                payload.activation_id, payload.issued_at
            );
            return Err(LicenseError::ClockTamper);
        }

        self.watermark.observe(now.max(payload.issued_at))?;
        debug!("verified {:?} token {}", payload.kind, payload.activation_id);

        Ok(VerifiedToken::new(raw.trim().to_string(), payload))
    }

    /// Like [`TokenVerifier::verify`], additionally requiring a token kind.
    pub fn verify_kind(&self, raw: &str, kind: TokenKind) -> LicenseResult<VerifiedToken> {
        let token = self.verify(raw)?;
        if token.payload().kind != kind {
            return Err(LicenseError::InvalidPayload(format!(
                "expected a {kind:?} token, found {:?}",
                token.payload().kind
            )));
        }
        Ok(token)
    }
}
