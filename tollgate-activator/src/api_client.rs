//! HTTP transport for the license server API.
//!
//! JSON over reqwest with rustls. Every call is a single POST; the server
//! answers `{ "token": "<envelope>" }` on success or `{ "code", "message" }`
//! with a non-2xx status on failure.

use crate::config::ServerConfig;
use crate::transport::{LicenseTransport, TransportError, TransportResult};
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, warn};

/// [`LicenseTransport`] over HTTPS.
pub struct HttpTransport {
    client: Client,
    config: ServerConfig,
}

impl HttpTransport {
    pub fn new(config: ServerConfig) -> TransportResult<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone());

        if let Some(proxy) = &config.network_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TransportError::Rejected(format!("invalid network proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Tls(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> TransportResult<reqwest::Response> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        debug!("POST {path}");

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body: ErrorBody = resp.json().await.unwrap_or_default();
        let err = map_status(status, &body);
        warn!("POST {path} failed with {status}: {err}");
        Err(err)
    }

    async fn post_for_token(&self, path: &str, body: &impl Serialize) -> TransportResult<String> {
        let resp: TokenResponse = self
            .post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Rejected(format!("malformed server response: {e}")))?;
        Ok(resp.token)
    }
}

#[async_trait]
impl LicenseTransport for HttpTransport {
    async fn activate(&self, req: &ActivationRequest) -> TransportResult<String> {
        self.post_for_token("/v1/activations", req).await
    }

    async fn activate_trial(&self, req: &TrialRequest) -> TransportResult<String> {
        self.post_for_token("/v1/trial-activations", req).await
    }

    async fn sync(&self, req: &SyncRequest) -> TransportResult<String> {
        self.post_for_token(&format!("/v1/activations/{}/sync", req.activation_id), req)
            .await
    }

    async fn deactivate(&self, req: &DeactivationRequest) -> TransportResult<()> {
        self.post(
            &format!("/v1/activations/{}/deactivate", req.activation_id),
            req,
        )
        .await?;
        Ok(())
    }
}

/// Maps an error response to a [`TransportError`], preferring the
/// server's error code over the bare status.
fn map_status(status: StatusCode, body: &ErrorBody) -> TransportError {
    match body.code.as_str() {
        "authentication_failed" => return TransportError::AuthenticationFailed,
        "country_restricted" => return TransportError::CountryRestricted,
        "ip_mismatch" => return TransportError::IpMismatch,
        "activation_not_found" => return TransportError::ActivationNotFound,
        "activation_limit_reached" => return TransportError::ActivationLimitReached,
        "revoked" => return TransportError::Revoked,
        "rate_limited" => return TransportError::RateLimited,
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED => TransportError::AuthenticationFailed,
        StatusCode::NOT_FOUND => TransportError::ActivationNotFound,
        StatusCode::CONFLICT => TransportError::ActivationLimitReached,
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
        s if s.is_server_error() => TransportError::Server(s.as_u16()),
        s => {
            let message = if body.message.is_empty() {
                format!("HTTP {}", s.as_u16())
            } else {
                body.message.clone()
            };
            TransportError::Rejected(message)
        }
    }
}

/// Classifies a reqwest failure by walking its source chain.
fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    let lower = chain.to_lowercase();

    if lower.contains("dns") || lower.contains("failed to lookup address") {
        TransportError::Dns(chain)
    } else if lower.contains("tls") || lower.contains("certificate") {
        TransportError::Tls(chain)
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(chain)
    } else {
        TransportError::Rejected(chain)
    }
}
