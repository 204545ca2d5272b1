//! Refresh cache with stale/prefetch timing and single-flight refresh.
//!
//! A [`RefreshCache`] wraps one provider and classifies its cached result
//! against the injected [`Clock`] on every call:
//!
//! | state         | condition                               | `get()` behavior                  |
//! |---------------|-----------------------------------------|-----------------------------------|
//! | `Empty`       | nothing cached                          | refresh, caller waits             |
//! | `Fresh`       | `now < prefetch_time`                   | cached value                      |
//! | `PrefetchDue` | `prefetch_time <= now < stale_time`     | cached value, background refresh  |
//! | `Stale`       | `stale_time <= now`                     | refresh, caller waits             |
//!
//! Refreshes are serialized by a per-cache lock. Callers that queued behind
//! a refresh re-check the cache once they get the lock and reuse the outcome
//! of the refresh they waited on instead of calling the provider again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::credential::{CredentialValue, RefreshResult};
use crate::provider::CredentialProvider;
use crate::{Error, Result};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct CacheOptions {
    refresh_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound for a single provider fetch.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    PrefetchDue,
    Stale,
}

impl CacheState {
    fn classify(cached: Option<&RefreshResult>, now: DateTime<Utc>) -> Self {
        match cached {
            None => CacheState::Empty,
            Some(result) if result.is_stale_at(now) => CacheState::Stale,
            Some(result) if result.is_prefetch_due_at(now) => CacheState::PrefetchDue,
            Some(_) => CacheState::Fresh,
        }
    }
}

#[derive(Default)]
struct State {
    cached: Option<RefreshResult>,
    /// Completed refresh attempts, successful or not.
    attempts: u64,
    last_error: Option<Error>,
}

impl State {
    /// Install `result` unless it expires before the cached value.
    ///
    /// A rejected result still moves the cached schedule forward to its own
    /// stale and prefetch times, capped at the cached expiration.
    fn install(&mut self, result: RefreshResult) -> RefreshResult {
        if let Some(current) = &self.cached
            && expires_before(&result, current)
        {
            tracing::warn!(
                current = ?current.credentials().expiration(),
                received = ?result.credentials().expiration(),
                "Provider returned credentials expiring before the cached ones; keeping cached"
            );
            let kept = reschedule(current, &result);
            self.cached = Some(kept.clone());
            return kept;
        }

        self.cached = Some(result.clone());
        result
    }
}

fn expires_before(new: &RefreshResult, current: &RefreshResult) -> bool {
    match (
        new.credentials().expiration(),
        current.credentials().expiration(),
    ) {
        (Some(new), Some(current)) => new < current,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn reschedule(current: &RefreshResult, rejected: &RefreshResult) -> RefreshResult {
    let cap = current
        .credentials()
        .expiration()
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let stale_time = current.stale_time().max(rejected.stale_time()).min(cap);
    let prefetch_time = current.prefetch_time().max(rejected.prefetch_time()).min(cap);
    RefreshResult::with_times(current.credentials().clone(), stale_time, prefetch_time)
}

struct Inner<P> {
    provider: P,
    state: RwLock<State>,
    refresh_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
}

impl<P: CredentialProvider> Inner<P> {
    /// Fetch and record the outcome. Callers hold `refresh_lock`.
    async fn run_refresh(&self) -> Result<RefreshResult> {
        let timeout = self.options.refresh_timeout;
        let outcome = match tokio::time::timeout(timeout, self.provider.fetch()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(timeout)),
        };

        let mut state = self.state.write().await;
        state.attempts += 1;

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    provider = self.provider.name(),
                    stale_time = %result.stale_time(),
                    prefetch_time = %result.prefetch_time(),
                    "Credentials refreshed"
                );
                state.last_error = None;
                Ok(state.install(result))
            }
            Err(err) => {
                tracing::warn!(provider = self.provider.name(), error = %err, "Credential refresh failed");
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Refresh unless another refresh finished after `seen_attempts`.
    async fn refresh_after(&self, seen_attempts: u64, force: bool) -> Result<RefreshResult> {
        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.state.read().await;
            if state.attempts != seen_attempts {
                if let Some(err) = &state.last_error {
                    return Err(err.clone());
                }
                if let Some(cached) = &state.cached
                    && (force || !cached.is_stale_at(self.clock.now()))
                {
                    return Ok(cached.clone());
                }
            }
        }

        self.run_refresh().await
    }
}

/// Caching wrapper around a [`CredentialProvider`].
///
/// Clones share the same cached value and refresh lock.
pub struct RefreshCache<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for RefreshCache<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: CredentialProvider + 'static> RefreshCache<P> {
    pub fn new(provider: P) -> Self {
        Self::with_options(provider, CacheOptions::default())
    }

    pub fn with_options(provider: P, options: CacheOptions) -> Self {
        Self::with_clock(provider, options, Arc::new(SystemClock))
    }

    pub fn with_clock(provider: P, options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                state: RwLock::new(State::default()),
                refresh_lock: Arc::new(Mutex::new(())),
                clock,
                options,
            }),
        }
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Current credentials, refreshing when empty or stale.
    ///
    /// When a refresh fails but the cached value has not reached its hard
    /// expiration, the cached value is returned and the failure is logged.
    pub async fn get(&self) -> Result<CredentialValue> {
        let now = self.inner.clock.now();
        let (current, cached, seen_attempts) = {
            let state = self.inner.state.read().await;
            (
                CacheState::classify(state.cached.as_ref(), now),
                state.cached.as_ref().map(|c| c.credentials().clone()),
                state.attempts,
            )
        };

        match (current, cached) {
            (CacheState::Fresh, Some(value)) => return Ok(value),
            (CacheState::PrefetchDue, Some(value)) => {
                self.spawn_prefetch();
                return Ok(value);
            }
            _ => {}
        }

        match self.inner.refresh_after(seen_attempts, false).await {
            Ok(result) => Ok(result.into_credentials()),
            Err(err) => self.fallback(err).await,
        }
    }

    /// Force a refresh, joining one already in progress.
    ///
    /// Errors propagate; the cached value is left untouched on failure.
    pub async fn refresh(&self) -> Result<CredentialValue> {
        let seen_attempts = self.inner.state.read().await.attempts;
        self.inner
            .refresh_after(seen_attempts, true)
            .await
            .map(RefreshResult::into_credentials)
    }

    pub async fn invalidate(&self) {
        let mut state = self.inner.state.write().await;
        state.cached = None;
    }

    pub async fn state(&self) -> CacheState {
        let state = self.inner.state.read().await;
        CacheState::classify(state.cached.as_ref(), self.inner.clock.now())
    }

    /// Cached result, if any, without triggering a refresh.
    pub async fn cached(&self) -> Option<RefreshResult> {
        self.inner.state.read().await.cached.clone()
    }

    fn spawn_prefetch(&self) {
        // Held lock means a refresh is already in flight.
        let Ok(guard) = Arc::clone(&self.inner.refresh_lock).try_lock_owned() else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = guard;
            let due = {
                let state = inner.state.read().await;
                CacheState::classify(state.cached.as_ref(), inner.clock.now())
                    != CacheState::Fresh
            };
            if due {
                tracing::debug!(provider = inner.provider.name(), "Prefetching credentials");
                let _ = inner.run_refresh().await;
            }
        });
    }

    async fn fallback(&self, err: Error) -> Result<CredentialValue> {
        let state = self.inner.state.read().await;
        match &state.cached {
            Some(cached) if !cached.credentials().is_expired_at(self.inner.clock.now()) => {
                tracing::warn!(
                    error = %err,
                    expiration = ?cached.credentials().expiration(),
                    "Serving cached credentials after failed refresh"
                );
                Ok(cached.credentials().clone())
            }
            _ => Err(err),
        }
    }
}

impl<P: CredentialProvider> fmt::Debug for RefreshCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCache")
            .field("provider", &self.inner.provider.name())
            .field("options", &self.inner.options)
            .finish()
    }
}
