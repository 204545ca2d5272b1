//! Credential provider trait.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::{Error, RefreshResult, Result};

/// Registered provider variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderType {
    StaticKey,
    SessionToken,
    RoleArn,
    EcsRole,
    KeyPair,
}

impl ProviderType {
    pub const ALL: [ProviderType; 5] = [
        ProviderType::StaticKey,
        ProviderType::SessionToken,
        ProviderType::EcsRole,
        ProviderType::RoleArn,
        ProviderType::KeyPair,
    ];

    /// Configuration discriminator (`type` key).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::StaticKey => "access_key",
            ProviderType::SessionToken => "sts",
            ProviderType::RoleArn => "ram_role_arn",
            ProviderType::EcsRole => "ecs_ram_role",
            ProviderType::KeyPair => "rsa_key_pair",
        }
    }

    /// Whether `fetch` performs network I/O.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ProviderType::RoleArn | ProviderType::EcsRole | ProviderType::KeyPair
        )
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = ProviderType::ALL.iter().map(|t| t.as_str()).collect();
                Error::config(format!(
                    "unsupported type option '{}', support: {}",
                    s,
                    supported.join(", ")
                ))
            })
    }
}

/// Non-secret description of a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderDescription {
    pub provider_type: ProviderType,
    pub metadata: BTreeMap<String, String>,
}

impl ProviderDescription {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl fmt::Display for ProviderDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider_type)?;
        for (key, value) in &self.metadata {
            write!(f, " {}#{}", key, value)?;
        }
        Ok(())
    }
}

/// Source of credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Provider name for debugging.
    fn name(&self) -> &str {
        self.provider_type().as_str()
    }

    fn provider_type(&self) -> ProviderType;

    /// Fetch fresh credentials and their refresh schedule.
    async fn fetch(&self) -> Result<RefreshResult>;

    /// Describe this provider without exposing secrets.
    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new(self.provider_type())
    }
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn provider_type(&self) -> ProviderType {
        (**self).provider_type()
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        (**self).fetch().await
    }

    fn describe(&self) -> ProviderDescription {
        (**self).describe()
    }
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn provider_type(&self) -> ProviderType {
        (**self).provider_type()
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        (**self).fetch().await
    }

    fn describe(&self) -> ProviderDescription {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_round_trip() {
        for provider_type in ProviderType::ALL {
            assert_eq!(
                provider_type.as_str().parse::<ProviderType>().unwrap(),
                provider_type
            );
        }
    }

    #[test]
    fn test_unsupported_type() {
        let err = "bearer".parse::<ProviderType>().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("unsupported type"));
        assert!(err.to_string().contains("ram_role_arn"));
    }

    #[test]
    fn test_description_display() {
        let description =
            ProviderDescription::new(ProviderType::KeyPair).with("public_key_id", "PK123");
        assert_eq!(description.to_string(), "rsa_key_pair public_key_id#PK123");
        assert_eq!(description.get("public_key_id"), Some("PK123"));
    }

    #[test]
    fn test_remote_variants() {
        assert!(!ProviderType::StaticKey.is_remote());
        assert!(!ProviderType::SessionToken.is_remote());
        assert!(ProviderType::RoleArn.is_remote());
    }
}
