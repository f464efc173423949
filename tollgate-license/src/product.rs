//! Product descriptor.
//!
//! The product file is shipped with the application and names the product,
//! carries the Ed25519 key that verifies every token and offline response,
//! and holds product metadata set in the dashboard. It is loaded once per
//! process and never changes afterwards.

use crate::error::{LicenseError, LicenseResult};
use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where activation data is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Per-user data directory; no elevated rights needed.
    User,
    /// Machine-wide directory; the application runs with admin/root rights.
    System,
    /// Nothing is written to disk; state lives as long as the process.
    InMemory,
}

impl PermissionScope {
    /// Returns the default data directory for this scope, or `None` for
    /// [`PermissionScope::InMemory`].
    #[must_use]
    pub fn default_dir(&self, product_id: &str) -> Option<PathBuf> {
        match self {
            Self::User => Some(
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tollgate")
                    .join(product_id),
            ),
            Self::System => Some(system_data_dir().join("tollgate").join(product_id)),
            Self::InMemory => None,
        }
    }
}

fn system_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        PathBuf::from("/var/lib")
    }
}

#[derive(Deserialize)]
struct ProductFile {
    product_id: String,
    public_key: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// A loaded product descriptor.
#[derive(Debug, Clone)]
pub struct Product {
    product_id: String,
    public_key: [u8; 32],
    metadata: BTreeMap<String, String>,
}

impl Product {
    /// Builds a product from its parts, validating the public key.
    pub fn new(
        product_id: impl Into<String>,
        public_key: [u8; 32],
        metadata: BTreeMap<String, String>,
    ) -> LicenseResult<Self> {
        let product_id = product_id.into();
        if product_id.trim().is_empty() {
            return Err(LicenseError::InvalidArgument("product id is empty".to_string()));
        }
        VerifyingKey::from_bytes(&public_key)
            .map_err(|_| LicenseError::InvalidArgument("invalid product public key".to_string()))?;

        Ok(Self {
            product_id,
            public_key,
            metadata,
        })
    }

    /// Loads the product file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LicenseError::InvalidPath(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_data(&data)
    }

    /// Parses product data: either the JSON document itself or its base64
    /// encoding, as exported from the dashboard.
    pub fn from_data(data: &str) -> LicenseResult<Self> {
        let data = data.trim();
        let file: ProductFile = match serde_json::from_str(data) {
            Ok(file) => file,
            Err(json_err) => {
                let decoded = STANDARD
                    .decode(data)
                    .map_err(|_| LicenseError::InvalidPayload(format!("product data: {json_err}")))?;
                serde_json::from_slice(&decoded)
                    .map_err(|e| LicenseError::InvalidPayload(format!("product data: {e}")))?
            }
        };

        let key_bytes = STANDARD
            .decode(file.public_key.trim())
            .map_err(|e| LicenseError::InvalidPayload(format!("product public key: {e}")))?;
        let public_key: [u8; 32] = key_bytes.try_into().map_err(|_| {
            LicenseError::InvalidPayload("product public key must be 32 bytes".to_string())
        })?;

        Self::new(file.product_id, public_key, file.metadata)
    }

    /// Returns the product id.
    #[must_use]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Returns the raw Ed25519 verification key.
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Returns a product metadata value.
    pub fn metadata(&self, key: &str) -> LicenseResult<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| LicenseError::MetadataNotFound(key.to_string()))
    }

    pub(crate) fn verifying_key(&self) -> LicenseResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| LicenseError::InvalidFormat("invalid product public key".to_string()))
    }
}
