//! Instance role credentials from the ECS metadata service.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use super::exchange::{
    ExchangeOptions, check_status, parse_expiration, require_field, require_keys,
};
use crate::cache::{Clock, SystemClock};
use crate::provider::{CredentialProvider, ProviderDescription, ProviderType};
use crate::transport::{ExchangeRequest, Transport};
use crate::{CredentialValue, Error, RefreshResult, Result, TimingPolicy};

const DEFAULT_METADATA_ENDPOINT: &str = "100.100.100.200";
const CREDENTIALS_PATH: &str = "latest/meta-data/ram/security-credentials/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
    code: Option<String>,
    access_key_id: Option<String>,
    access_key_secret: Option<String>,
    security_token: Option<String>,
    expiration: Option<String>,
}

/// Fetches credentials for the role attached to the instance.
///
/// When no role name is configured, the first role listed by the metadata
/// service is used and remembered for the lifetime of the provider.
pub struct EcsRoleProvider {
    role_name: Option<String>,
    discovered_role: OnceCell<String>,
    options: ExchangeOptions,
    transport: Arc<dyn Transport>,
    timing: TimingPolicy,
    clock: Arc<dyn Clock>,
}

impl EcsRoleProvider {
    pub fn new(role_name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let role_name = role_name.into();
        Self {
            role_name: (!role_name.is_empty()).then_some(role_name),
            discovered_role: OnceCell::new(),
            options: ExchangeOptions::default(),
            transport,
            timing: TimingPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Provider that discovers its role name on first fetch.
    pub fn discover(transport: Arc<dyn Transport>) -> Self {
        Self::new("", transport)
    }

    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn role_name(&self) -> Option<&str> {
        self.role_name
            .as_deref()
            .or_else(|| self.discovered_role.get().map(String::as_str))
    }

    fn credentials_url(&self) -> Result<Url> {
        let base = self
            .options
            .endpoint_url(DEFAULT_METADATA_ENDPOINT, "http")?;
        base.join(CREDENTIALS_PATH)
            .map_err(|e| Error::config(format!("invalid metadata endpoint: {}", e)))
    }

    async fn resolve_role(&self) -> Result<String> {
        if let Some(ref role) = self.role_name {
            return Ok(role.clone());
        }

        let role = self
            .discovered_role
            .get_or_try_init(|| async {
                let request = ExchangeRequest::get(self.credentials_url()?)
                    .with_timeout(self.options.timeout);
                let response = self.transport.send(request).await?;
                check_status(&response)?;

                let role = response
                    .body
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .ok_or_else(|| Error::validation("no role attached to this instance"))?
                    .to_string();

                tracing::debug!(role = %role, "Discovered instance role");
                Ok::<_, Error>(role)
            })
            .await?;

        Ok(role.clone())
    }
}

#[async_trait]
impl CredentialProvider for EcsRoleProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::EcsRole
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        let role = self.resolve_role().await?;
        let url = self
            .credentials_url()?
            .join(&role)
            .map_err(|e| Error::config(format!("invalid role name '{}': {}", role, e)))?;

        tracing::debug!(role = %role, "Fetching instance role credentials");

        let response = self
            .transport
            .send(ExchangeRequest::get(url).with_timeout(self.options.timeout))
            .await?;
        check_status(&response)?;

        let body: MetadataCredentials = response.json()?;
        if let Some(code) = body.code.as_deref()
            && code != "Success"
        {
            return Err(Error::Exchange {
                status: response.status,
                code: code.to_string(),
                message: format!("metadata service refused credentials for role {}", role),
                request_id: None,
            });
        }

        let (access_key_id, access_key_secret) =
            require_keys(body.access_key_id, body.access_key_secret)?;
        let security_token = require_field(body.security_token, "SecurityToken")?;
        let expiration = parse_expiration(&require_field(body.expiration, "Expiration")?)?;

        let credentials = CredentialValue::new(access_key_id, access_key_secret)
            .with_security_token(security_token)
            .with_expiration(expiration);
        Ok(self.timing.schedule(credentials, self.clock.now()))
    }

    fn describe(&self) -> ProviderDescription {
        let description = ProviderDescription::new(ProviderType::EcsRole);
        match self.role_name() {
            Some(role) => description.with("role_name", role),
            None => description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::{ECS_RESPONSE, MockTransport, connection_refused};

    #[tokio::test]
    async fn test_ecs_role_fetch() {
        let transport = Arc::new(MockTransport::new().respond(200, ECS_RESPONSE));
        let provider = EcsRoleProvider::new("web", transport.clone());

        let result = provider.fetch().await.unwrap();
        assert_eq!(result.credentials().access_key_id(), "STS.ecs-key");
        assert_eq!(result.credentials().security_token(), "ecs-token");

        let requests = transport.requests();
        assert_eq!(
            requests[0].url.as_str(),
            "http://100.100.100.200/latest/meta-data/ram/security-credentials/web"
        );
    }

    #[tokio::test]
    async fn test_ecs_role_discovery() {
        let transport = Arc::new(
            MockTransport::new()
                .respond(200, "web\n")
                .respond(200, ECS_RESPONSE),
        );
        let provider = EcsRoleProvider::discover(transport.clone());
        assert!(provider.role_name().is_none());

        provider.fetch().await.unwrap();
        provider.fetch().await.unwrap();

        assert_eq!(provider.role_name(), Some("web"));
        let urls: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "/latest/meta-data/ram/security-credentials/",
                "/latest/meta-data/ram/security-credentials/web",
                "/latest/meta-data/ram/security-credentials/web",
            ]
        );
    }

    #[tokio::test]
    async fn test_ecs_role_discovery_network_failure() {
        let transport = Arc::new(MockTransport::new().fail(connection_refused().await));
        let provider = EcsRoleProvider::discover(transport.clone());

        let err = provider.fetch().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(err.is_retryable());
        assert!(provider.role_name().is_none());
    }

    #[tokio::test]
    async fn test_ecs_role_failure_code() {
        let body = r#"{"Code":"Failed","AccessKeyId":"","AccessKeySecret":""}"#;
        let transport = Arc::new(MockTransport::new().respond(200, body));
        let err = EcsRoleProvider::new("web", transport)
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange { ref code, .. } if code == "Failed"));
    }

    #[tokio::test]
    async fn test_ecs_role_missing_token() {
        let body = r#"{"Code":"Success","AccessKeyId":"a","AccessKeySecret":"b","Expiration":"2099-02-19T07:02:36Z"}"#;
        let transport = Arc::new(MockTransport::new().respond(200, body));
        let err = EcsRoleProvider::new("web", transport)
            .fetch()
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_ecs_role_custom_endpoint() {
        let transport = Arc::new(MockTransport::new().respond(200, ECS_RESPONSE));
        let provider = EcsRoleProvider::new("web", transport.clone())
            .with_options(ExchangeOptions::new().with_endpoint("http://127.0.0.1:9000"));
        provider.fetch().await.unwrap();
        assert_eq!(
            transport.requests()[0].url.as_str(),
            "http://127.0.0.1:9000/latest/meta-data/ram/security-credentials/web"
        );
    }
}
