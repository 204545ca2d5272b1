//! Shared plumbing for providers that call a remote exchange endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::config::ProviderConfig;
use crate::signer::{Signer, sign_params};
use crate::transport::{ExchangeRequest, ExchangeResponse};
use crate::{Error, Result};

pub(crate) const API_VERSION: &str = "2015-04-01";
pub(crate) const DEFAULT_DURATION_SECONDS: u32 = 3600;
pub(crate) const MIN_DURATION_SECONDS: u32 = 900;

/// Per-provider endpoint and timeout overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
}

impl ExchangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read `<endpoint_key>` and `timeout_ms` from a provider config.
    pub fn from_config(config: &ProviderConfig, endpoint_key: &str) -> Result<Self> {
        let endpoint = match config.get(endpoint_key) {
            None => None,
            Some(value) if value.is_null() => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| Error::config(format!("{} must be a string", endpoint_key)))?
                    .to_string(),
            ),
        };

        let timeout = match config.get("timeout_ms") {
            None => None,
            Some(value) if value.is_null() => None,
            Some(value) => {
                let ms = value
                    .as_i64()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| Error::config("timeout_ms must be a positive integer"))?;
                Some(Duration::from_millis(ms as u64))
            }
        };

        Ok(Self { endpoint, timeout })
    }

    pub(crate) fn endpoint_url(&self, default_host: &str, default_scheme: &str) -> Result<Url> {
        resolve_endpoint(
            self.endpoint.as_deref().unwrap_or(default_host),
            default_scheme,
        )
    }
}

/// Accepts a bare host (`sts.aliyuncs.com`) or a full URL.
pub(crate) fn resolve_endpoint(endpoint: &str, default_scheme: &str) -> Result<Url> {
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("{}://{}", default_scheme, endpoint)
    };

    Url::parse(&raw).map_err(|e| Error::config(format!("invalid endpoint '{}': {}", endpoint, e)))
}

/// Build a signed RPC-style GET request.
pub(crate) fn signed_rpc_request(
    url: Url,
    action: &str,
    access_key_id: &str,
    params: BTreeMap<String, String>,
    signer: &dyn Signer,
    secret: &str,
    timeout: Option<Duration>,
) -> ExchangeRequest {
    let mut query = params;
    query.insert("Action".into(), action.into());
    query.insert("Format".into(), "JSON".into());
    query.insert("Version".into(), API_VERSION.into());
    query.insert("AccessKeyId".into(), access_key_id.into());
    query.insert(
        "Timestamp".into(),
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    );
    query.insert("SignatureNonce".into(), uuid::Uuid::new_v4().to_string());

    let query = sign_params(signer, "GET", query, secret);
    ExchangeRequest::get(url)
        .with_query(query)
        .with_timeout(timeout)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDocument {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

/// Map a non-2xx response onto [`Error::Exchange`].
pub(crate) fn check_status(response: &ExchangeResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }

    let doc: ErrorDocument = serde_json::from_str(&response.body).unwrap_or_default();
    Err(Error::Exchange {
        status: response.status,
        code: doc.code.unwrap_or_else(|| "Unknown".into()),
        message: doc
            .message
            .unwrap_or_else(|| response.body.chars().take(256).collect()),
        request_id: doc.request_id,
    })
}

/// Both key fields must be present and non-empty.
pub(crate) fn require_keys(id: Option<String>, secret: Option<String>) -> Result<(String, String)> {
    match (id, secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
        _ => Err(Error::validation("incomplete credentials in response")),
    }
}

pub(crate) fn require_field(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(format!("missing {} in response", field)))
}

pub(crate) fn check_duration_seconds(seconds: u32) -> Result<u32> {
    if seconds < MIN_DURATION_SECONDS {
        return Err(Error::config(format!(
            "duration_seconds must be at least {} seconds, got {}",
            MIN_DURATION_SECONDS, seconds
        )));
    }
    Ok(seconds)
}

/// Parse `YYYY-MM-DDThh:mm:ss[.sss]Z`.
pub fn parse_expiration(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("invalid expiration '{}': {}", value, e)))
}
