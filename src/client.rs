//! Credential facade.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{CacheOptions, CacheState, Clock, RefreshCache, SystemClock};
use crate::config::ProviderConfig;
use crate::credential::CredentialValue;
use crate::factory::ProviderFactory;
use crate::provider::{CredentialProvider, ProviderDescription, ProviderType};
use crate::Result;

type BoxedProvider = Box<dyn CredentialProvider>;

/// Auto-refreshing credential built from a provider config.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct Credential {
    cache: RefreshCache<BoxedProvider>,
    config: Option<Arc<ProviderConfig>>,
}

impl Credential {
    /// Build with a default HTTP transport.
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        Self::with_factory(&ProviderFactory::new()?, &config)
    }

    /// Build with `factory`; the cache classifies against the factory's clock.
    pub fn with_factory(factory: &ProviderFactory, config: &ProviderConfig) -> Result<Self> {
        let mut credential = CredentialBuilder::new(factory.build(config)?)
            .clock(factory.clock().clone())
            .build();
        credential.config = Some(Arc::new(config.clone()));
        Ok(credential)
    }

    pub fn from_provider(provider: impl CredentialProvider + 'static) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: impl CredentialProvider + 'static) -> CredentialBuilder {
        CredentialBuilder::new(Box::new(provider))
    }

    /// Current credentials, refreshing if needed.
    pub async fn get(&self) -> Result<CredentialValue> {
        self.cache.get().await
    }

    /// Alias for [`Credential::get`].
    pub async fn fetch(&self) -> Result<CredentialValue> {
        self.get().await
    }

    pub async fn access_key_id(&self) -> Result<String> {
        Ok(self.get().await?.access_key_id().to_string())
    }

    pub async fn access_key_secret(&self) -> Result<String> {
        Ok(self.get().await?.access_key_secret().to_string())
    }

    /// Session token, empty for static access keys.
    pub async fn security_token(&self) -> Result<String> {
        Ok(self.get().await?.security_token().to_string())
    }

    pub async fn expiration(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get().await?.expiration())
    }

    pub async fn refresh(&self) -> Result<CredentialValue> {
        self.cache.refresh().await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await
    }

    pub async fn state(&self) -> CacheState {
        self.cache.state().await
    }

    pub fn provider_type(&self) -> ProviderType {
        self.cache.provider().provider_type()
    }

    pub fn describe(&self) -> ProviderDescription {
        self.cache.provider().describe()
    }

    /// Config this credential was built from, if any.
    pub fn config(&self) -> Option<&ProviderConfig> {
        self.config.as_deref()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.describe().to_string())
            .finish()
    }
}

pub struct CredentialBuilder {
    provider: BoxedProvider,
    options: CacheOptions,
    clock: Arc<dyn Clock>,
}

impl CredentialBuilder {
    fn new(provider: BoxedProvider) -> Self {
        Self {
            provider,
            options: CacheOptions::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn cache_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Clock for cache classification. Providers built by hand keep their own
    /// clock, so pass the same one to both.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Credential {
        Credential {
            cache: RefreshCache::with_clock(self.provider, self.options, self.clock),
            config: None,
        }
    }
}
