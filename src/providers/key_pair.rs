//! Key-pair session access key exchange.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
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
use crate::{CredentialValue, Error, RefreshResult, Result, TimingPolicy};

const DEFAULT_STS_ENDPOINT: &str = "sts.ap-northeast-1.aliyuncs.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateSessionResponse {
    request_id: Option<String>,
    session_access_key: Option<SessionAccessKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionAccessKey {
    session_access_key_id: Option<String>,
    session_access_key_secret: Option<String>,
    expiration: Option<String>,
}

/// Exchanges a public key id and private key for a session access key.
///
/// The exchange returns no security token.
pub struct KeyPairProvider {
    public_key_id: String,
    private_key: SecretString,
    private_key_file: Option<PathBuf>,
    duration_seconds: u32,
    options: ExchangeOptions,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    timing: TimingPolicy,
    clock: Arc<dyn Clock>,
}

impl KeyPairProvider {
    pub fn new(
        public_key_id: impl Into<String>,
        private_key: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Ok(Self {
            public_key_id: non_empty("public_key_id", public_key_id.into())?,
            private_key: SecretString::from(non_empty("private_key", private_key.into())?),
            private_key_file: None,
            duration_seconds: DEFAULT_DURATION_SECONDS,
            options: ExchangeOptions::default(),
            transport,
            signer: Arc::new(HmacSha1Signer),
            timing: TimingPolicy::default(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Load the private key from `path`; read failures name the path.
    pub fn from_file(
        public_key_id: impl Into<String>,
        path: impl AsRef<Path>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let public_key_id = non_empty("public_key_id", public_key_id.into())?;
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::config("private_key_file cannot be empty"));
        }

        let private_key = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if private_key.trim().is_empty() {
            return Err(Error::config(format!(
                "private_key_file {} is empty",
                path.display()
            )));
        }

        let mut provider = Self::new(public_key_id, private_key, transport)?;
        provider.private_key_file = Some(path.to_path_buf());
        Ok(provider)
    }

    /// Session lifetime; rejects values below 900 seconds.
    pub fn with_duration_seconds(mut self, seconds: u32) -> Result<Self> {
        self.duration_seconds = check_duration_seconds(seconds)?;
        Ok(self)
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

    pub fn public_key_id(&self) -> &str {
        &self.public_key_id
    }

    pub fn private_key(&self) -> &str {
        self.private_key.expose_secret()
    }

    pub fn private_key_file(&self) -> Option<&Path> {
        self.private_key_file.as_deref()
    }
}

#[async_trait]
impl CredentialProvider for KeyPairProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::KeyPair
    }

    async fn fetch(&self) -> Result<RefreshResult> {
        let url = self.options.endpoint_url(DEFAULT_STS_ENDPOINT, "https")?;
        let mut params = BTreeMap::new();
        params.insert(
            "DurationSeconds".to_string(),
            self.duration_seconds.to_string(),
        );

        let request = signed_rpc_request(
            url,
            "GenerateSessionAccessKey",
            &self.public_key_id,
            params,
            self.signer.as_ref(),
            self.private_key.expose_secret(),
            self.options.timeout,
        );

        tracing::debug!(public_key_id = %self.public_key_id, "Generating session access key");

        let response = self.transport.send(request).await?;
        check_status(&response)?;

        let body: GenerateSessionResponse = response.json()?;
        let session = body
            .session_access_key
            .ok_or_else(|| Error::validation("incomplete credentials in response"))?;

        let (access_key_id, access_key_secret) = require_keys(
            session.session_access_key_id,
            session.session_access_key_secret,
        )?;
        let expiration = parse_expiration(&require_field(session.expiration, "Expiration")?)?;

        tracing::debug!(
            request_id = body.request_id.as_deref().unwrap_or_default(),
            expiration = %expiration,
            "Session access key issued"
        );

        let credentials =
            CredentialValue::new(access_key_id, access_key_secret).with_expiration(expiration);
        Ok(self.timing.schedule(credentials, self.clock.now()))
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new(ProviderType::KeyPair)
            .with("public_key_id", self.public_key_id.clone())
    }
}
