//! Externally supplied session token provider.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use super::static_key::non_empty;
use crate::cache::{Clock, SystemClock};
use crate::provider::{CredentialProvider, ProviderDescription, ProviderType};
use crate::{CredentialValue, Error, RefreshResult, Result};

/// Provider wrapping a session token it cannot renew.
///
/// The refresh schedule is derived from the fixed expiration once and
/// reused by every later fetch.
pub struct SessionTokenProvider {
    access_key_id: String,
    access_key_secret: SecretString,
    security_token: SecretString,
    expiration: Option<DateTime<Utc>>,
    result: OnceLock<RefreshResult>,
    clock: Arc<dyn Clock>,
}

impl SessionTokenProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            access_key_id: non_empty("access_key_id", access_key_id.into())?,
            access_key_secret: SecretString::from(non_empty(
                "access_key_secret",
                access_key_secret.into(),
            )?),
            security_token: SecretString::from(non_empty(
                "security_token",
                security_token.into(),
            )?),
            expiration: None,
            result: OnceLock::new(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self.result = OnceLock::new();
        self
    }

    /// Clock used to detect that the token has expired.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    fn compute(&self) -> RefreshResult {
        let mut credentials = CredentialValue::new(
            self.access_key_id.clone(),
            self.access_key_secret.expose_secret(),
        )
        .with_security_token(self.security_token.expose_secret());

        match self.expiration {
            Some(expiration) => {
                credentials = credentials.with_expiration(expiration);
                RefreshResult::with_times(credentials, expiration, expiration)
            }
            None => RefreshResult::new(credentials),
        }
    }
}

#[async_trait]
impl CredentialProvider for SessionTokenProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::SessionToken
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        let result = self.result.get_or_init(|| self.compute());

        if let Some(expiration) = self.expiration
            && self.clock.now() >= expiration
        {
            return Err(Error::validation(format!(
                "session token expired at {}",
                expiration.to_rfc3339()
            )));
        }

        Ok(result.clone())
    }

    fn describe(&self) -> ProviderDescription {
        let description = ProviderDescription::new(ProviderType::SessionToken)
            .with("access_key_id", self.access_key_id.clone());
        match self.expiration {
            Some(expiration) => description.with("expiration", expiration.to_rfc3339()),
            None => description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::ManualClock;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_session_token_fetch() {
        let expiration = Utc::now() + TimeDelta::hours(1);
        let provider = SessionTokenProvider::new("STS.id", "secret", "token")
            .unwrap()
            .with_expiration(expiration);

        let result = provider.fetch().await.unwrap();
        assert_eq!(result.credentials().security_token(), "token");
        assert_eq!(result.credentials().expiration(), Some(expiration));
        assert_eq!(result.stale_time(), expiration);
        assert_eq!(result.prefetch_time(), expiration);
    }

    #[tokio::test]
    async fn test_session_token_result_is_memoized() {
        let provider = SessionTokenProvider::new("STS.id", "secret", "token").unwrap();
        let first = provider.fetch().await.unwrap();
        let second = provider.fetch().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.stale_time(), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_session_token_expired() {
        let provider = SessionTokenProvider::new("STS.id", "secret", "token")
            .unwrap()
            .with_expiration(Utc::now() - TimeDelta::seconds(1));

        let err = provider.fetch().await.unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_session_token_expiry_follows_clock() {
        let expiration = DateTime::from_timestamp(1_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(999, 0).unwrap()));
        let provider = SessionTokenProvider::new("STS.id", "secret", "token")
            .unwrap()
            .with_expiration(expiration)
            .with_clock(clock.clone());

        provider.fetch().await.unwrap();
        clock.set(expiration);
        assert!(provider.fetch().await.unwrap_err().to_string().contains("expired"));
    }

    #[test]
    fn test_session_token_required() {
        let err = SessionTokenProvider::new("STS.id", "secret", "").err().unwrap();
        assert!(err.to_string().contains("security_token cannot be empty"));
    }
}
