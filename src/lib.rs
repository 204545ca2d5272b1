//! # cloud-credentials
//!
//! Short-lived, auto-refreshing credentials for cloud API clients.
//!
//! A [`Credential`] is built from a declarative [`ProviderConfig`]. The
//! configured provider (static keys, session token, role assumption, instance
//! role or key-pair exchange) is wrapped in a [`RefreshCache`] that serves the
//! cached value, prefetches in the background before it goes stale, and
//! collapses concurrent refreshes into a single exchange call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cloud_credentials::{Credential, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cloud_credentials::Error> {
//!     let config = ProviderConfig::new("ram_role_arn")
//!         .set("access_key_id", "LTAI...")
//!         .set("access_key_secret", "...")
//!         .set("role_arn", "acs:ram::123456:role/deployer");
//!
//!     let credential = Credential::from_config(config)?;
//!     println!("{}", credential.access_key_id().await?);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod client;
pub mod config;
pub mod credential;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod signer;
pub mod transport;

mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheOptions, CacheState, Clock, RefreshCache, SystemClock};
pub use client::{Credential, CredentialBuilder};
pub use config::{ConfigValue, ProviderConfig};
pub use credential::{CredentialValue, RefreshResult, TimingPolicy};
pub use factory::{ParamKind, ParamSpec, ProviderFactory, Requirement};
pub use provider::{CredentialProvider, ProviderDescription, ProviderType};
pub use providers::{
    EcsRoleProvider, ExchangeOptions, KeyPairProvider, RoleArnProvider, SessionTokenProvider,
    StaticKeyProvider, parse_expiration,
};
pub use signer::{HmacSha1Signer, HmacSha256Signer, Signer};
pub use transport::{ExchangeRequest, ExchangeResponse, HttpTransport, Transport, TransportConfig};

/// Error type for credential operations.
///
/// Errors are `Clone` so that one refresh outcome can be handed to every
/// caller attached to the same in-flight refresh.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or missing provider configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local resource could not be read.
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Transport failure reaching the exchange endpoint.
    #[error("Network request failed: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// Refresh exceeded its time bound.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Exchange endpoint answered with an error document.
    #[error("Exchange failed (HTTP {status}): {code}: {message}")]
    Exchange {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// Well-formed response lacking required fields, or an unparsable value.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Response body was not valid JSON.
    #[error("JSON parsing failed: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown type, missing or malformed parameters
    Configuration,
    /// Local file access failures
    Io,
    /// Transport, timeout, or remote rejection; may succeed on retry
    Network,
    /// Response content could not be turned into credentials
    Validation,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Io { .. } => ErrorCategory::Io,
            Error::Network(_) | Error::Timeout(_) | Error::Exchange { .. } => {
                ErrorCategory::Network
            }
            Error::Validation(_) | Error::Json(_) => ErrorCategory::Validation,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_validation_error(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Exchange { status, .. } => *status >= 500 || *status == 429,
            _ => self.category() == ErrorCategory::Network,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
