//! Text envelopes for tokens, offline requests and offline responses.
//!
//! Envelopes use the format `base64url(payload).base64url(tag)`.
//!
//! - Signed envelopes (tokens, offline responses): the tag is an Ed25519
//!   signature over the base64url payload *text*, not the decoded bytes.
//! - Digest envelopes (offline requests): the tag is SHA-256 of the payload
//!   text, which catches transfer corruption but proves nothing about origin.
//!
//! The envelope string is stored and transferred verbatim, so it round-trips
//! byte-identically.

use crate::error::{LicenseError, LicenseResult};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

fn split(raw: &str) -> LicenseResult<(&str, &str)> {
    let raw = raw.trim();
    let mut parts = raw.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(payload), Some(tag), None) if !payload.is_empty() && !tag.is_empty() => {
            Ok((payload, tag))
        }
        _ => Err(LicenseError::InvalidFormat(
            "envelope must have exactly two parts separated by a dot".to_string(),
        )),
    }
}

fn decode_payload(payload_b64: &str) -> LicenseResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| LicenseError::InvalidFormat(format!("invalid payload base64: {e}")))
}

/// Signs `payload` and returns the envelope string.
///
/// Used by issuers (license server, offline response tooling) and tests.
#[must_use]
pub fn seal(payload: &[u8], signing_key: &SigningKey) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signature = signing_key.sign(payload_b64.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
    format!("{payload_b64}.{sig_b64}")
}

/// Verifies a signed envelope and returns the decoded payload bytes.
///
/// The signature is checked before the payload is decoded.
pub fn open(raw: &str, verifying_key: &VerifyingKey) -> LicenseResult<Vec<u8>> {
    let (payload_b64, sig_b64) = split(raw)?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| LicenseError::InvalidSignature)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| LicenseError::InvalidSignature)?;

    verifying_key
        .verify(payload_b64.as_bytes(), &signature)
        .map_err(|_| LicenseError::InvalidSignature)?;

    decode_payload(payload_b64)
}

/// Wraps `payload` in a digest envelope.
#[must_use]
pub fn seal_digest(payload: &[u8]) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let digest = Sha256::digest(payload_b64.as_bytes());
    format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(digest))
}

/// Checks a digest envelope and returns the decoded payload bytes.
pub fn open_digest(raw: &str) -> LicenseResult<Vec<u8>> {
    let (payload_b64, digest_b64) = split(raw)?;
    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(payload_b64.as_bytes()));
    if expected != digest_b64 {
        return Err(LicenseError::RequestDigestMismatch);
    }
    decode_payload(payload_b64)
}
