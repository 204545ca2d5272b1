//! Role assumption through the STS `AssumeRole` action.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::exchange::{
    DEFAULT_DURATION_SECONDS, ExchangeOptions, check_duration_seconds, check_status,
    parse_expiration, require_field, require_keys, signed_rpc_request,
};
use super::static_key::non_empty;
use crate::cache::{Clock, SystemClock};
use crate::provider::{CredentialProvider, ProviderDescription, ProviderType};
use crate::signer::{HmacSha1Signer, Signer};
use crate::transport::Transport;
use crate::{CredentialValue, RefreshResult, Result, TimingPolicy};

const DEFAULT_STS_ENDPOINT: &str = "sts.aliyuncs.com";
pub const DEFAULT_ROLE_SESSION_NAME: &str = "cloud-credentials";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    request_id: Option<String>,
    credentials: Option<SessionCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCredentials {
    access_key_id: Option<String>,
    access_key_secret: Option<String>,
    security_token: Option<String>,
    expiration: Option<String>,
}

/// Exchanges a long-lived access key for a role session.
pub struct RoleArnProvider {
    access_key_id: String,
    access_key_secret: SecretString,
    role_arn: String,
    role_session_name: String,
    duration_seconds: u32,
    policy: Option<String>,
    external_id: Option<String>,
    options: ExchangeOptions,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    timing: TimingPolicy,
    clock: Arc<dyn Clock>,
}

impl RoleArnProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        role_arn: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Ok(Self {
            access_key_id: non_empty("access_key_id", access_key_id.into())?,
            access_key_secret: SecretString::from(non_empty(
                "access_key_secret",
                access_key_secret.into(),
            )?),
            role_arn: non_empty("role_arn", role_arn.into())?,
            role_session_name: DEFAULT_ROLE_SESSION_NAME.to_string(),
            duration_seconds: DEFAULT_DURATION_SECONDS,
            policy: None,
            external_id: None,
            options: ExchangeOptions::default(),
            transport,
            signer: Arc::new(HmacSha1Signer),
            timing: TimingPolicy::default(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_role_session_name(mut self, name: impl Into<String>) -> Self {
        self.role_session_name = name.into();
        self
    }

    /// Session lifetime; rejects values below 900 seconds.
    pub fn with_duration_seconds(mut self, seconds: u32) -> Result<Self> {
        self.duration_seconds = check_duration_seconds(seconds)?;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
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

    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    pub fn role_session_name(&self) -> &str {
        &self.role_session_name
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    fn request_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("RoleArn".to_string(), self.role_arn.clone());
        params.insert(
            "RoleSessionName".to_string(),
            self.role_session_name.clone(),
        );
        params.insert(
            "DurationSeconds".to_string(),
            self.duration_seconds.to_string(),
        );
        if let Some(ref policy) = self.policy {
            params.insert("Policy".to_string(), policy.clone());
        }
        if let Some(ref external_id) = self.external_id {
            params.insert("ExternalId".to_string(), external_id.clone());
        }
        params
    }
}

#[async_trait]
impl CredentialProvider for RoleArnProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::RoleArn
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        let url = self.options.endpoint_url(DEFAULT_STS_ENDPOINT, "https")?;
        let request = signed_rpc_request(
            url,
            "AssumeRole",
            &self.access_key_id,
            self.request_params(),
            self.signer.as_ref(),
            self.access_key_secret.expose_secret(),
            self.options.timeout,
        );

        tracing::debug!(
            role_arn = %self.role_arn,
            session = %self.role_session_name,
            "Assuming role"
        );

        let response = self.transport.send(request).await?;
        check_status(&response)?;

        let body: AssumeRoleResponse = response.json()?;
        let session = body
            .credentials
            .ok_or_else(|| crate::Error::validation("incomplete credentials in response"))?;

        let (access_key_id, access_key_secret) =
            require_keys(session.access_key_id, session.access_key_secret)?;
        let security_token = require_field(session.security_token, "SecurityToken")?;
        let expiration = parse_expiration(&require_field(session.expiration, "Expiration")?)?;

        tracing::debug!(
            request_id = body.request_id.as_deref().unwrap_or_default(),
            expiration = %expiration,
            "Role session issued"
        );

        let credentials = CredentialValue::new(access_key_id, access_key_secret)
            .with_security_token(security_token)
            .with_expiration(expiration);
        Ok(self.timing.schedule(credentials, self.clock.now()))
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new(ProviderType::RoleArn)
            .with("access_key_id", self.access_key_id.clone())
            .with("role_arn", self.role_arn.clone())
            .with("role_session_name", self.role_session_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::{MockTransport, ROLE_ARN_RESPONSE, connection_refused};

    fn provider(transport: Arc<MockTransport>) -> RoleArnProvider {
        RoleArnProvider::new("AKID", "SECRET", "acs:ram::1234:role/deployer", transport).unwrap()
    }

    #[tokio::test]
    async fn test_assume_role() {
        let transport = Arc::new(MockTransport::new().respond(200, ROLE_ARN_RESPONSE));
        let result = provider(transport.clone()).fetch().await.unwrap();

        let credentials = result.credentials();
        assert_eq!(credentials.access_key_id(), "STS.NUgYrLnoC37mZZCNnAbez2");
        assert_eq!(
            credentials.access_key_secret(),
            "CVwjCkNzTMupZ8NbTCxCBRq3K16jtcWFTJAyBEv2"
        );
        assert_eq!(credentials.security_token(), "CAISsgJ1q6Ft5B2yfSjIr5bSEsj4g");
        assert_eq!(
            credentials.expiration(),
            Some(parse_expiration("2099-02-19T07:02:36Z").unwrap())
        );
        assert!(result.prefetch_time() <= result.stale_time());
        assert!(result.stale_time() < credentials.expiration().unwrap());
    }

    #[tokio::test]
    async fn test_assume_role_request_parameters() {
        let transport = Arc::new(MockTransport::new().respond(200, ROLE_ARN_RESPONSE));
        provider(transport.clone())
            .with_role_session_name("ci")
            .with_duration_seconds(900)
            .unwrap()
            .with_policy(r#"{"Statement":[]}"#)
            .with_external_id("ext-1")
            .fetch()
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url.host_str(), Some("sts.aliyuncs.com"));
        assert_eq!(request.query_param("Action"), Some("AssumeRole"));
        assert_eq!(request.query_param("AccessKeyId"), Some("AKID"));
        assert_eq!(
            request.query_param("RoleArn"),
            Some("acs:ram::1234:role/deployer")
        );
        assert_eq!(request.query_param("RoleSessionName"), Some("ci"));
        assert_eq!(request.query_param("DurationSeconds"), Some("900"));
        assert_eq!(request.query_param("Policy"), Some(r#"{"Statement":[]}"#));
        assert_eq!(request.query_param("ExternalId"), Some("ext-1"));
        assert!(request.query_param("Signature").is_some());
    }

    #[tokio::test]
    async fn test_assume_role_missing_security_token() {
        let body = r#"{"RequestId":"1","Credentials":{"AccessKeyId":"STS.a","AccessKeySecret":"b","Expiration":"2099-02-19T07:02:36Z"}}"#;
        let transport = Arc::new(MockTransport::new().respond(200, body));

        let err = provider(transport).fetch().await.unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("SecurityToken"));
    }

    #[tokio::test]
    async fn test_assume_role_missing_secret() {
        let body = r#"{"RequestId":"1","Credentials":{"AccessKeyId":"STS.a","SecurityToken":"t","Expiration":"2099-02-19T07:02:36Z"}}"#;
        let transport = Arc::new(MockTransport::new().respond(200, body));

        let err = provider(transport).fetch().await.unwrap_err();
        assert!(err.to_string().contains("incomplete credentials in response"));
    }

    #[tokio::test]
    async fn test_assume_role_rejected() {
        let body = r#"{"RequestId":"1","Code":"InvalidAccessKeyId.NotFound","Message":"Specified access key is not found."}"#;
        let transport = Arc::new(MockTransport::new().respond(404, body));

        let err = provider(transport).fetch().await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Exchange { ref code, .. } if code == "InvalidAccessKeyId.NotFound"
        ));
    }

    #[tokio::test]
    async fn test_assume_role_network_failure() {
        let transport = Arc::new(MockTransport::new().fail(connection_refused().await));

        let err = provider(transport.clone()).fetch().await.unwrap_err();
        assert!(matches!(err, crate::Error::Network(_)));
        assert!(err.is_retryable());
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_duration_below_floor() {
        let transport = Arc::new(MockTransport::new());
        let err = provider(transport).with_duration_seconds(600).err().unwrap();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("at least 900"));
    }

    #[tokio::test]
    async fn test_assume_role_custom_endpoint() {
        let transport = Arc::new(MockTransport::new().respond(200, ROLE_ARN_RESPONSE));
        provider(transport.clone())
            .with_options(ExchangeOptions::new().with_endpoint("sts.cn-shanghai.aliyuncs.com"))
            .fetch()
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].url.host_str(),
            Some("sts.cn-shanghai.aliyuncs.com")
        );
    }

    #[test]
    fn test_describe() {
        let transport = Arc::new(MockTransport::new());
        let description = provider(transport).describe();
        assert_eq!(description.provider_type.as_str(), "ram_role_arn");
        assert_eq!(description.get("role_arn"), Some("acs:ram::1234:role/deployer"));
        assert_eq!(description.get("role_session_name"), Some(DEFAULT_ROLE_SESSION_NAME));
    }
}
