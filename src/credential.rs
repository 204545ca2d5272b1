//! Credential value types and refresh timing.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Secret material returned by a provider.
#[derive(Clone)]
pub struct CredentialValue {
    access_key_id: String,
    access_key_secret: SecretString,
    security_token: SecretString,
    expiration: Option<DateTime<Utc>>,
}

impl CredentialValue {
    /// Long-lived access key with no session token and no expiry.
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: SecretString::from(access_key_secret.into()),
            security_token: SecretString::from(String::new()),
            expiration: None,
        }
    }

    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = SecretString::from(token.into());
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn access_key_secret(&self) -> &str {
        self.access_key_secret.expose_secret()
    }

    /// Session token, empty for non-session credentials.
    pub fn security_token(&self) -> &str {
        self.security_token.expose_secret()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    /// Whether the credential is past its hard expiration at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.map(|exp| now >= exp).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl PartialEq for CredentialValue {
    fn eq(&self, other: &Self) -> bool {
        self.access_key_id == other.access_key_id
            && self.access_key_secret() == other.access_key_secret()
            && self.security_token() == other.security_token()
            && self.expiration == other.expiration
    }
}

impl Eq for CredentialValue {}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialValue")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"[redacted]")
            .field(
                "security_token",
                &(!self.security_token().is_empty()).then_some("[redacted]"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Credentials plus the instants at which they should be refreshed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshResult {
    credentials: CredentialValue,
    stale_time: DateTime<Utc>,
    prefetch_time: DateTime<Utc>,
}

impl RefreshResult {
    /// Result that is never refreshed.
    pub fn new(credentials: CredentialValue) -> Self {
        Self {
            credentials,
            stale_time: DateTime::<Utc>::MAX_UTC,
            prefetch_time: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Prefetch time is clamped so it never falls after the stale time.
    pub fn with_times(
        credentials: CredentialValue,
        stale_time: DateTime<Utc>,
        prefetch_time: DateTime<Utc>,
    ) -> Self {
        Self {
            credentials,
            stale_time,
            prefetch_time: prefetch_time.min(stale_time),
        }
    }

    pub fn credentials(&self) -> &CredentialValue {
        &self.credentials
    }

    pub fn into_credentials(self) -> CredentialValue {
        self.credentials
    }

    pub fn stale_time(&self) -> DateTime<Utc> {
        self.stale_time
    }

    pub fn prefetch_time(&self) -> DateTime<Utc> {
        self.prefetch_time
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.stale_time
    }

    pub fn is_prefetch_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.prefetch_time
    }
}

const DEFAULT_STALE_MARGIN: Duration = Duration::from_secs(15 * 60);
const DEFAULT_PREFETCH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Computes stale and prefetch instants for expiring credentials.
///
/// Margins shrink for short-lived credentials so that
/// `now <= prefetch <= stale <= expiration` always holds.
#[derive(Clone, Copy, Debug)]
pub struct TimingPolicy {
    stale_margin: Duration,
    prefetch_margin: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            stale_margin: DEFAULT_STALE_MARGIN,
            prefetch_margin: DEFAULT_PREFETCH_MARGIN,
        }
    }
}

impl TimingPolicy {
    pub fn new(stale_margin: Duration, prefetch_margin: Duration) -> Self {
        Self {
            stale_margin,
            prefetch_margin,
        }
    }

    pub fn with_stale_margin(mut self, margin: Duration) -> Self {
        self.stale_margin = margin;
        self
    }

    pub fn with_prefetch_margin(mut self, margin: Duration) -> Self {
        self.prefetch_margin = margin;
        self
    }

    pub fn stale_margin(&self) -> Duration {
        self.stale_margin
    }

    pub fn prefetch_margin(&self) -> Duration {
        self.prefetch_margin
    }

    /// Schedule a result for `credentials` fetched at `now`.
    pub fn schedule(&self, credentials: CredentialValue, now: DateTime<Utc>) -> RefreshResult {
        let Some(expiration) = credentials.expiration() else {
            return RefreshResult::new(credentials);
        };

        if expiration <= now {
            return RefreshResult::with_times(credentials, expiration, expiration);
        }

        let remaining = expiration - now;
        let stale_time = expiration - margin(self.stale_margin).min(remaining / 2);
        let prefetch_time = stale_time - margin(self.prefetch_margin).min((stale_time - now) / 2);

        RefreshResult::with_times(credentials, stale_time, prefetch_time)
    }
}

fn margin(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
