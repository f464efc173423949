//! Machine fingerprinting.
//!
//! Activation tokens are pinned to the fingerprint of the machine that
//! requested them. The host fingerprint only hashes identifiers that survive
//! reboots and routine changes (hostname renames, user switches), so minor
//! reconfiguration does not unbind a license.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// Produces a stable identifier for the current machine.
pub trait Fingerprinter: Send + Sync {
    /// Returns the fingerprint string embedded in activation requests.
    fn fingerprint(&self) -> String;
}

/// Fingerprints the host from its OS, architecture and machine id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFingerprinter;

impl Fingerprinter for HostFingerprinter {
    fn fingerprint(&self) -> String {
        fingerprint_components(&collect_hardware_ids())
    }
}

/// A fixed fingerprint, for embedding hosts that compute their own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFingerprinter(pub String);

impl Fingerprinter for StaticFingerprinter {
    fn fingerprint(&self) -> String {
        self.0.clone()
    }
}

/// Hashes identifier components into a fingerprint.
///
/// Components are joined with `|` and the first 16 bytes of the SHA-256
/// digest are base64url encoded.
#[must_use]
pub fn fingerprint_components(components: &[String]) -> String {
    let combined = components.join("|");
    let hash = Sha256::digest(combined.as_bytes());
    URL_SAFE_NO_PAD.encode(&hash[..16])
}

/// Descriptive information about the host, sent alongside activation
/// requests so the dashboard can show where a license is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os_name: String,
    pub hostname: String,
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            hostname: hostname_or_unknown(),
            arch: env::consts::ARCH.to_string(),
        }
    }
}

fn collect_hardware_ids() -> Vec<String> {
    // Without a machine id the hostname is the best remaining anchor.
    let anchor = machine_id().unwrap_or_else(hostname_or_unknown);
    vec![env::consts::OS.to_string(), env::consts::ARCH.to_string(), anchor]
}

fn hostname_or_unknown() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
const MACHINE_ID_FILES: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[cfg(target_os = "linux")]
fn machine_id() -> Option<String> {
    MACHINE_ID_FILES.iter().find_map(|path| {
        let id = std::fs::read_to_string(path).ok()?;
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    })
}

#[cfg(target_os = "macos")]
fn machine_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    // Line shape: "IOPlatformUUID" = "XXXXXXXX-...."
    String::from_utf8(output.stdout)
        .ok()?
        .lines()
        .find_map(|line| line.split_once("\"IOPlatformUUID\" = "))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn machine_id() -> Option<String> {
    None
}
