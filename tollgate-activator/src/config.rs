//! Activator configuration.

use crate::error::{ActivatorError, ActivatorResult};
use crate::types::UserCredential;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tollgate_license::{
    FileStorage, GraceBoundary, LicenseError, MemoryStorage, PermissionScope, Product, SlotStorage,
};

/// How to reach the license server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the license API (e.g., "https://api.tollgate.dev").
    pub api_base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Lower bound for the background sync interval, whatever the token asks for.
    pub min_sync_interval_secs: u64,

    /// Optional proxy URL for all server traffic.
    pub network_proxy: Option<String>,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tollgate.dev".to_string(),
            request_timeout_secs: 30,
            min_sync_interval_secs: 60,
            network_proxy: None,
            user_agent: concat!("tollgate-activator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Where the product descriptor comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductSource {
    File(PathBuf),
    Data(String),
}

/// Everything an [`crate::Activator`] needs to start.
#[derive(Clone, Debug)]
pub struct InitContext {
    pub product: Option<ProductSource>,
    /// Expected product id; must match the product data when set.
    pub product_id: Option<String>,
    pub scope: PermissionScope,
    /// Overrides the scope's default data directory.
    pub storage_dir: Option<PathBuf>,
    pub license_key: Option<String>,
    pub license_user_credential: Option<UserCredential>,
    pub activation_metadata: BTreeMap<String, String>,
    pub trial_activation_metadata: BTreeMap<String, String>,
    pub app_version: Option<String>,
    pub grace_boundary: GraceBoundary,
    pub server: ServerConfig,
}

impl InitContext {
    pub fn builder() -> InitContextBuilder {
        InitContextBuilder::default()
    }

    /// Checks the context for usage errors without touching the network.
    pub fn validate(&self) -> ActivatorResult<()> {
        self.load_product()?;

        if let Some(dir) = &self.storage_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(LicenseError::InvalidPath(dir.display().to_string()).into());
            }
        }

        let url = self.server.api_base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ActivatorError::Config(format!(
                "api_base_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ActivatorError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the product descriptor and checks it against `product_id`.
    pub fn load_product(&self) -> ActivatorResult<Product> {
        let product = match &self.product {
            Some(ProductSource::File(path)) => Product::from_file(path)?,
            Some(ProductSource::Data(data)) => Product::from_data(data)?,
            None => return Err(LicenseError::ProductNotSet.into()),
        };

        if let Some(expected) = &self.product_id {
            if expected != product.product_id() {
                return Err(LicenseError::InvalidArgument(format!(
                    "product id {expected} does not match product data ({})",
                    product.product_id()
                ))
                .into());
            }
        }
        Ok(product)
    }

    /// Opens the slot storage for `product_id` according to the scope.
    pub fn open_storage(&self, product_id: &str) -> ActivatorResult<Arc<dyn SlotStorage>> {
        if let Some(dir) = &self.storage_dir {
            return Ok(Arc::new(FileStorage::new(dir)));
        }
        match self.scope.default_dir(product_id) {
            Some(dir) => Ok(Arc::new(FileStorage::new(dir))),
            None => Ok(Arc::new(MemoryStorage::new())),
        }
    }
}

/// Builder for [`InitContext`].
#[derive(Debug)]
pub struct InitContextBuilder {
    ctx: InitContext,
}

impl Default for InitContextBuilder {
    fn default() -> Self {
        Self {
            ctx: InitContext {
                product: None,
                product_id: None,
                scope: PermissionScope::User,
                storage_dir: None,
                license_key: None,
                license_user_credential: None,
                activation_metadata: BTreeMap::new(),
                trial_activation_metadata: BTreeMap::new(),
                app_version: None,
                grace_boundary: GraceBoundary::default(),
                server: ServerConfig::default(),
            },
        }
    }
}

impl InitContextBuilder {
    pub fn product_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ctx.product = Some(ProductSource::File(path.into()));
        self
    }

    pub fn product_data(mut self, data: impl Into<String>) -> Self {
        self.ctx.product = Some(ProductSource::Data(data.into()));
        self
    }

    pub fn product_id(mut self, product_id: impl Into<String>, scope: PermissionScope) -> Self {
        self.ctx.product_id = Some(product_id.into());
        self.ctx.scope = scope;
        self
    }

    pub fn license_key(mut self, key: impl Into<String>) -> Self {
        self.ctx.license_key = Some(key.into());
        self
    }

    pub fn license_user_credential(
        mut self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.ctx.license_user_credential = Some(UserCredential {
            email: email.into(),
            password: password.into(),
        });
        self
    }

    pub fn activation_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.activation_metadata.insert(key.into(), value.into());
        self
    }

    pub fn trial_activation_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.ctx
            .trial_activation_metadata
            .insert(key.into(), value.into());
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.ctx.app_version = Some(version.into());
        self
    }

    pub fn network_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.ctx.server.network_proxy = Some(proxy.into());
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ctx.storage_dir = Some(dir.into());
        self
    }

    pub fn grace_boundary(mut self, boundary: GraceBoundary) -> Self {
        self.ctx.grace_boundary = boundary;
        self
    }

    pub fn server(mut self, server: ServerConfig) -> Self {
        self.ctx.server = server;
        self
    }

    /// Validates and returns the context.
    pub fn build(self) -> ActivatorResult<InitContext> {
        self.ctx.validate()?;
        Ok(self.ctx)
    }
}
