//! Static access key provider.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::provider::{CredentialProvider, ProviderDescription, ProviderType};
use crate::{CredentialValue, Error, RefreshResult, Result};

/// Provider with a fixed, long-lived access key pair.
pub struct StaticKeyProvider {
    access_key_id: String,
    access_key_secret: SecretString,
}

impl StaticKeyProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Result<Self> {
        let access_key_id = non_empty("access_key_id", access_key_id.into())?;
        let access_key_secret = non_empty("access_key_secret", access_key_secret.into())?;

        Ok(Self {
            access_key_id,
            access_key_secret: SecretString::from(access_key_secret),
        })
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

pub(crate) fn non_empty(name: &str, value: String) -> Result<String> {
    if value.is_empty() {
        return Err(Error::config(format!("{} cannot be empty", name)));
    }
    Ok(value)
}

#[async_trait]
impl CredentialProvider for StaticKeyProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::StaticKey
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        Ok(RefreshResult::new(CredentialValue::new(
            self.access_key_id.clone(),
            self.access_key_secret.expose_secret(),
        )))
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new(ProviderType::StaticKey)
            .with("access_key_id", self.access_key_id.clone())
    }
}
