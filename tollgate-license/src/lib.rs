//! Licensing core for Tollgate.
//!
//! This crate handles everything that can be decided on the client without a
//! network connection:
//! - Ed25519 verification of activation and trial tokens
//! - Machine binding via hardware fingerprinting
//! - Clock rollback detection via a persisted time watermark
//! - The license state machine (valid, expired, suspended, revoked,
//!   grace period over, failed)
//! - Meter attribute counters
//! - Offline activation, deactivation and trial exchange files
//! - Local (unsigned) trials
//!
//! Talking to the license server and scheduling background syncs live in
//! `tollgate-activator`.
//!
//! # Token Format
//!
//! Tokens are formatted as: `base64url(payload).base64url(signature)`
//! The payload is a JSON [`TokenPayload`] signed with the product's Ed25519
//! key. The signature covers the base64url payload text.

mod clock;
mod device;
mod envelope;
mod error;
mod local_trial;
mod meter;
mod offline;
mod product;
mod session;
mod state;
mod storage;
mod token;
mod trial;
mod verify;
mod watermark;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{DeviceInfo, Fingerprinter, HostFingerprinter, StaticFingerprinter, fingerprint_components};
pub use envelope::{open, open_digest, seal, seal_digest};
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use local_trial::{LocalTrial, LocalTrialStatus};
pub use meter::MeterLedger;
pub use offline::{
    MeterUses, OfflineKind, OfflineOutcome, OfflineProtocol, OfflineRequest, OfflineResponse,
};
pub use product::{PermissionScope, Product};
pub use session::ActivationSession;
pub use state::{
    GraceBoundary, LicenseState, StatusReport, SyncState, derive_report, derive_state,
};
pub use storage::{FileStorage, MemoryStorage, Slot, SlotStorage, TokenStore};
pub use token::{LicenseType, LicenseUser, MeterAttribute, TokenKind, TokenPayload, VerifiedToken};
pub use trial::{TrialSession, TrialStatus};
pub use verify::{TokenVerifier, decode_token};
pub use watermark::{CLOCK_TOLERANCE_SECS, Watermark};
