//! Wire types for the license server API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tollgate_license::{DeviceInfo, MeterUses};

/// Email/password pair for licenses that require user authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub product_id: String,
    pub license_key: String,
    pub fingerprint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub meter_attributes: Vec<MeterUses>,
    #[serde(default)]
    pub app_version: Option<String>,
    pub device: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_credential: Option<UserCredential>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub product_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub app_version: Option<String>,
    pub device: DeviceInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub product_id: String,
    pub activation_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub meter_attributes: Vec<MeterUses>,
    #[serde(default)]
    pub app_version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationRequest {
    pub product_id: String,
    pub activation_id: String,
    pub fingerprint: String,
}

/// Successful activation / trial / sync response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Error response body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
