//! Activation engine for Tollgate.
//!
//! Builds on `tollgate-license` with everything that needs the network or a
//! runtime:
//! - [`InitContext`] / [`ServerConfig`] configuration
//! - the [`LicenseTransport`] seam and its reqwest implementation
//! - the background sync scheduler with grace-period bookkeeping
//! - the [`Activator`] facade applications call

pub mod activator;
pub mod api_client;
pub mod config;
pub mod error;
pub mod sync_engine;
pub mod transport;
pub mod types;

pub use activator::Activator;
pub use api_client::HttpTransport;
pub use config::{InitContext, InitContextBuilder, ProductSource, ServerConfig};
pub use error::{ActivatorError, ActivatorResult};
pub use sync_engine::{StatusCallback, SyncCore, SyncEngine, SyncHandle, create_sync_engine};
pub use transport::{LicenseTransport, TransportError, TransportResult};
pub use types::*;
