//! Provider construction from declarative configuration.
//!
//! Every provider type declares a static parameter table. Building a
//! provider resolves each declared parameter against the config (keys are
//! case-insensitive), falls back to the declared default, and fails with a
//! configuration error naming the first missing required parameter.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{Clock, SystemClock};
use crate::config::{ConfigValue, ProviderConfig};
use crate::credential::TimingPolicy;
use crate::provider::{CredentialProvider, ProviderType};
use crate::providers::exchange::{DEFAULT_DURATION_SECONDS, MIN_DURATION_SECONDS};
use crate::providers::{
    EcsRoleProvider, ExchangeOptions, KeyPairProvider, RoleArnProvider, SessionTokenProvider,
    StaticKeyProvider, parse_expiration,
};
use crate::signer::{HmacSha1Signer, Signer};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

/// Expected shape of a parameter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    /// Receives the full provider config.
    WholeConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
    Default(&'static str),
}

/// One entry of a provider's parameter table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub requirement: Requirement,
}

impl ParamSpec {
    const fn required(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            requirement: Requirement::Required,
        }
    }

    const fn optional(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            requirement: Requirement::Optional,
        }
    }

    const fn string(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            requirement: Requirement::Default(default),
        }
    }

    const fn integer(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Integer,
            requirement: Requirement::Default(default),
        }
    }

    const fn whole_config(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::WholeConfig,
            requirement: Requirement::Required,
        }
    }
}

const STATIC_KEY_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("access_key_id"),
    ParamSpec::required("access_key_secret"),
];

const SESSION_TOKEN_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("access_key_id"),
    ParamSpec::required("access_key_secret"),
    ParamSpec::required("security_token"),
    ParamSpec::optional("expiration"),
];

const ROLE_ARN_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("access_key_id"),
    ParamSpec::required("access_key_secret"),
    ParamSpec::required("role_arn"),
    ParamSpec::string("role_session_name", "cloud-credentials"),
    ParamSpec::integer("duration_seconds", "3600"),
    ParamSpec::optional("policy"),
    ParamSpec::optional("external_id"),
    ParamSpec::whole_config("options"),
];

const ECS_ROLE_PARAMS: &[ParamSpec] = &[
    ParamSpec::string("role_name", ""),
    ParamSpec::whole_config("options"),
];

const KEY_PAIR_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("public_key_id"),
    ParamSpec::required("private_key_file"),
    ParamSpec::integer("duration_seconds", "3600"),
    ParamSpec::whole_config("options"),
];

impl ProviderType {
    /// Parameter table used to bind this provider from config.
    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            ProviderType::StaticKey => STATIC_KEY_PARAMS,
            ProviderType::SessionToken => SESSION_TOKEN_PARAMS,
            ProviderType::RoleArn => ROLE_ARN_PARAMS,
            ProviderType::EcsRole => ECS_ROLE_PARAMS,
            ProviderType::KeyPair => KEY_PAIR_PARAMS,
        }
    }
}

#[derive(Debug)]
enum Bound<'a> {
    Str(String),
    Int(i64),
    Config(&'a ProviderConfig),
}

/// Parameter values resolved against one provider's table.
#[derive(Debug)]
struct BoundParams<'a> {
    values: BTreeMap<&'static str, Bound<'a>>,
}

impl<'a> BoundParams<'a> {
    fn bind(provider_type: ProviderType, config: &'a ProviderConfig) -> Result<Self> {
        let mut values = BTreeMap::new();

        for spec in provider_type.params() {
            let bound = if spec.kind == ParamKind::WholeConfig {
                Some(Bound::Config(config))
            } else {
                match config.get(spec.name).filter(|v| !v.is_null()) {
                    Some(value) => Some(coerce(spec, value)?),
                    None => match spec.requirement {
                        Requirement::Default(default) => {
                            Some(coerce(spec, &ConfigValue::from(default))?)
                        }
                        Requirement::Optional => None,
                        Requirement::Required => {
                            return Err(Error::config(format!(
                                "missing required option {} for {}",
                                spec.name, provider_type
                            )));
                        }
                    },
                }
            };

            if let Some(bound) = bound {
                values.insert(spec.name, bound);
            }
        }

        Ok(Self { values })
    }

    fn string(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(Bound::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Declared-required or defaulted string; always bound after `bind`.
    fn required_string(&self, name: &str) -> String {
        self.string(name).unwrap_or_default()
    }

    fn duration_seconds(&self) -> Result<u32> {
        let seconds = match self.values.get("duration_seconds") {
            Some(Bound::Int(seconds)) => *seconds,
            _ => i64::from(DEFAULT_DURATION_SECONDS),
        };

        u32::try_from(seconds).map_err(|_| {
            Error::config(format!(
                "duration_seconds must be at least {} seconds, got {}",
                MIN_DURATION_SECONDS, seconds
            ))
        })
    }

    fn options(&self, endpoint_key: &str) -> Result<ExchangeOptions> {
        match self.values.get("options") {
            Some(Bound::Config(config)) => ExchangeOptions::from_config(config, endpoint_key),
            _ => Ok(ExchangeOptions::default()),
        }
    }
}

fn coerce<'a>(spec: &ParamSpec, value: &ConfigValue) -> Result<Bound<'a>> {
    let shape = match spec.kind {
        ParamKind::String => value.as_str().map(|s| Bound::Str(s.to_string())),
        ParamKind::Integer => value.as_i64().map(Bound::Int),
        ParamKind::WholeConfig => None,
    };

    shape.ok_or_else(|| {
        let expected = match spec.kind {
            ParamKind::Integer => "an integer",
            _ => "a string",
        };
        Error::config(format!("{} must be {}", spec.name, expected))
    })
}

/// Builds providers from [`ProviderConfig`].
///
/// Providers share the factory's transport, signer, timing policy and clock.
#[derive(Clone, Debug)]
pub struct ProviderFactory {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    timing: TimingPolicy,
    clock: Arc<dyn Clock>,
}

impl ProviderFactory {
    /// Factory backed by a default [`HttpTransport`].
    pub fn new() -> Result<Self> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signer: Arc::new(HmacSha1Signer),
            timing: TimingPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    /// Clock used for refresh schedules and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Build the provider selected by the config's `type` key.
    pub fn build(&self, config: &ProviderConfig) -> Result<Box<dyn CredentialProvider>> {
        let provider_type: ProviderType = match config.get(crate::config::TYPE_KEY) {
            None => return Err(Error::config("missing type option")),
            Some(value) => value
                .as_str()
                .ok_or_else(|| Error::config("type must be a string"))?
                .parse()?,
        };

        let params = BoundParams::bind(provider_type, config)?;
        tracing::debug!(provider_type = %provider_type, "Building credential provider");

        let provider: Box<dyn CredentialProvider> = match provider_type {
            ProviderType::StaticKey => Box::new(StaticKeyProvider::new(
                params.required_string("access_key_id"),
                params.required_string("access_key_secret"),
            )?),

            ProviderType::SessionToken => {
                let provider = SessionTokenProvider::new(
                    params.required_string("access_key_id"),
                    params.required_string("access_key_secret"),
                    params.required_string("security_token"),
                )?
                .with_clock(self.clock.clone());
                match params.string("expiration") {
                    Some(raw) => {
                        let expiration = parse_expiration(&raw).map_err(|_| {
                            Error::config(format!("expiration '{}' is not an ISO-8601 instant", raw))
                        })?;
                        Box::new(provider.with_expiration(expiration))
                    }
                    None => Box::new(provider),
                }
            }

            ProviderType::RoleArn => {
                let mut provider = RoleArnProvider::new(
                    params.required_string("access_key_id"),
                    params.required_string("access_key_secret"),
                    params.required_string("role_arn"),
                    self.transport.clone(),
                )?
                .with_role_session_name(params.required_string("role_session_name"))
                .with_duration_seconds(params.duration_seconds()?)?
                .with_options(params.options("sts_endpoint")?)
                .with_signer(self.signer.clone())
                .with_timing(self.timing)
                .with_clock(self.clock.clone());

                if let Some(policy) = params.string("policy") {
                    provider = provider.with_policy(policy);
                }
                if let Some(external_id) = params.string("external_id") {
                    provider = provider.with_external_id(external_id);
                }
                Box::new(provider)
            }

            ProviderType::EcsRole => Box::new(
                EcsRoleProvider::new(params.required_string("role_name"), self.transport.clone())
                    .with_options(params.options("metadata_endpoint")?)
                    .with_timing(self.timing)
                    .with_clock(self.clock.clone()),
            ),

            ProviderType::KeyPair => Box::new(
                KeyPairProvider::from_file(
                    params.required_string("public_key_id"),
                    params.required_string("private_key_file"),
                    self.transport.clone(),
                )?
                .with_duration_seconds(params.duration_seconds()?)?
                .with_options(params.options("sts_endpoint")?)
                .with_signer(self.signer.clone())
                .with_timing(self.timing)
                .with_clock(self.clock.clone()),
            ),
        };

        Ok(provider)
    }
}
