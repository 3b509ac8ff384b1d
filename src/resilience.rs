//! Resilient execution of protected QuickBooks calls.
//!
//! Three layers, outermost first:
//!
//! 1. [`RateLimitRetry`]: a 429 waits a flat delay and retries, up to a fixed
//!    number of attempts in total.
//! 2. [`UnauthorizedRetry`]: a 401 from the call triggers one refresh and
//!    one retry. A second 401 is fatal.
//! 3. [`TokenGate`]: loads the current credential, failing fast when there is
//!    none and refreshing it first when it has expired.
//!
//! Whatever escapes all three is classified into an [`ApiError`] in exactly
//! one place, [`ResilientExecutor::execute`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ApiError, RemoteError};
use crate::store::CredentialStore;
use crate::types::Credential;

/// An outbound request that needs a valid bearer credential
#[async_trait]
pub trait ProtectedCall: Send + Sync {
    type Output: Send;

    async fn call(&self, credential: &Credential) -> Result<Self::Output, RemoteError>;
}

/// Something that can turn a stale credential into a fresh, persisted one
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, stale: &Credential) -> Result<Credential, ApiError>;
}

/// Outcome of an inner layer: either a remote failure an outer layer may
/// still handle, or an error that is already final.
#[derive(Debug)]
pub enum CallError {
    Remote(RemoteError),
    Fatal(ApiError),
}

impl From<ApiError> for CallError {
    fn from(e: ApiError) -> Self {
        CallError::Fatal(e)
    }
}

impl From<CallError> for ApiError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Remote(remote) => remote.into(),
            CallError::Fatal(api) => api,
        }
    }
}

/// Token presence and freshness check in front of the raw call
pub struct TokenGate {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn CredentialRefresher>,
}

impl TokenGate {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self { store, refresher }
    }

    /// Current credential, refreshed first if it has expired
    pub async fn credential(&self) -> Result<Credential, ApiError> {
        let credential = self
            .store
            .current()
            .await?
            .ok_or_else(ApiError::no_credential)?;

        if credential.is_expired() {
            debug!(id = credential.id, "Access token expired, refreshing before call");
            return self.refresher.refresh(&credential).await;
        }

        Ok(credential)
    }
}

/// One refresh-and-retry when QuickBooks rejects a locally valid token
pub struct UnauthorizedRetry {
    gate: TokenGate,
}

impl UnauthorizedRetry {
    pub fn new(gate: TokenGate) -> Self {
        Self { gate }
    }

    pub async fn execute<C: ProtectedCall>(&self, call: &C) -> Result<C::Output, CallError> {
        let credential = self.gate.credential().await?;

        match call.call(&credential).await {
            Err(e) if e.is_unauthorized() => {
                warn!(id = credential.id, "QuickBooks rejected access token, refreshing once");
                let refreshed = self.gate.refresher.refresh(&credential).await?;

                match call.call(&refreshed).await {
                    Err(e) if e.is_unauthorized() => Err(CallError::Fatal(ApiError::Unauthenticated(
                        "QuickBooks rejected the refreshed token. Authenticate again.".to_string(),
                    ))),
                    other => other.map_err(CallError::Remote),
                }
            }
            other => other.map_err(CallError::Remote),
        }
    }
}

/// Fixed-delay retry on 429, per QuickBooks' flat cooldown guidance
pub struct RateLimitRetry {
    inner: UnauthorizedRetry,
    max_attempts: u32,
    delay: Duration,
}

impl RateLimitRetry {
    pub fn new(inner: UnauthorizedRetry, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub async fn execute<C: ProtectedCall>(&self, call: &C) -> Result<C::Output, CallError> {
        for attempt in 1..=self.max_attempts {
            match self.inner.execute(call).await {
                Err(CallError::Remote(e)) if e.is_rate_limited() => {
                    crate::metrics::METRICS.rate_limited_total.inc();
                    if attempt == self.max_attempts {
                        break;
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = self.delay.as_secs_f64(),
                        "Rate limited by QuickBooks, backing off"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }

        Err(CallError::Fatal(ApiError::RateLimitExceeded))
    }
}

/// The full stack: rate limit → unauthorized retry → token gate → call
pub struct ResilientExecutor {
    outer: RateLimitRetry,
}

impl ResilientExecutor {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn CredentialRefresher>,
        policy: &RetryConfig,
    ) -> Self {
        let gate = TokenGate::new(store, refresher);
        let outer = RateLimitRetry::new(UnauthorizedRetry::new(gate), policy.max_attempts, policy.delay());
        Self { outer }
    }

    pub async fn execute<C: ProtectedCall>(&self, call: &C) -> Result<C::Output, ApiError> {
        self.outer.execute(call).await.map_err(ApiError::from)
    }
}
