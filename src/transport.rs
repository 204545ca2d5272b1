//! Transport used by providers to reach exchange and metadata endpoints.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::signer::canonical_query;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_USER_AGENT: &str = concat!("cloud-credentials/", env!("CARGO_PKG_VERSION"));

/// Outbound exchange request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub method: Method,
    pub url: Url,
    pub query: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ExchangeRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            query: BTreeMap::new(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Raw response from an exchange endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeResponse {
    pub status: u16,
    pub body: String,
}

impl ExchangeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// One request/response round trip.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse>;
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            http,
            timeout: config.timeout,
        })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut url = request.url;
        if !request.query.is_empty() {
            url.set_query(Some(&canonical_query(&request.query)));
        }

        let mut req = self.http.request(request.method, url).timeout(timeout);

        for (name, value) in &request.headers {
            req = req.header(name, value);
        }

        let response = req.send().await.map_err(|e| network_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| network_error(e, timeout))?;

        tracing::trace!(status, bytes = body.len(), "Exchange response received");
        Ok(ExchangeResponse { status, body })
    }
}

fn network_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::from(err)
    }
}
