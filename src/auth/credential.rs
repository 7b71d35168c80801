use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::errors::CredentialError;
use super::token_source::TokenSource;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Credential Manager
// ============================================================================
//
// Single source of truth for the upstream access token.
//
// Fast path: a read lock on the cached credential. Slow path: callers queue
// on `refresh_gate`; the first one through performs the refresh, the others
// find a new generation when they get the gate and return that token
// without calling the token endpoint again. If the attempt they waited on
// failed, they share its error instead of retrying on their own.
//
// A rejected credential is remembered, so every later caller fails fast
// with the same fatal error instead of hammering the token endpoint.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl Credential {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Valid and not inside the refresh margin
    pub fn is_fresh(&self, now: Instant, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

#[derive(Default)]
struct CredentialState {
    credential: Option<Credential>,
    rejection: Option<CredentialError>,
    /// Bumped on every successful refresh
    generation: u64,
    /// Bumped on every finished refresh attempt, successful or not
    attempts: u64,
    last_failure: Option<CredentialError>,
}

pub struct CredentialManager {
    source: Arc<dyn TokenSource>,
    safety_margin: Duration,
    retry: RetryConfig,
    state: RwLock<CredentialState>,
    refresh_gate: Mutex<()>,
    refreshes: AtomicU64,
}

impl CredentialManager {
    pub fn new(source: Arc<dyn TokenSource>, safety_margin: Duration) -> Self {
        Self {
            source,
            safety_margin,
            retry: RetryConfig::token_refresh(),
            state: RwLock::new(CredentialState::default()),
            refresh_gate: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Return a usable access token, refreshing it at most once across all
    /// concurrent callers.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        let (seen_generation, seen_attempts) = {
            let state = self.state.read().await;
            if let Some(err) = &state.rejection {
                return Err(err.clone());
            }
            if let Some(credential) = &state.credential {
                if credential.is_fresh(Instant::now(), self.safety_margin) {
                    return Ok(credential.token.clone());
                }
            }
            (state.generation, state.attempts)
        };

        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.state.read().await;
            if let Some(err) = &state.rejection {
                return Err(err.clone());
            }
            if let Some(credential) = &state.credential {
                let now = Instant::now();
                let refreshed_meanwhile = state.generation != seen_generation;
                if credential.is_fresh(now, self.safety_margin)
                    || (refreshed_meanwhile && !credential.is_expired(now))
                {
                    tracing::debug!("Reusing token refreshed by a concurrent caller");
                    return Ok(credential.token.clone());
                }
            }
            if state.attempts != seen_attempts {
                if let Some(err) = &state.last_failure {
                    tracing::debug!(error = %err, "Refresh by a concurrent caller failed, sharing its error");
                    return Err(err.clone());
                }
            }
        }

        self.refresh().await
    }

    /// Drop the cached token so the next caller refreshes. Used when a
    /// business endpoint answers 401 to a token we believed valid.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if state.credential.take().is_some() {
            tracing::warn!("Cached access token invalidated");
        }
    }

    /// Number of successful refreshes since startup
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub async fn is_rejected(&self) -> bool {
        self.state.read().await.rejection.is_some()
    }

    // Caller must hold `refresh_gate`.
    async fn refresh(&self) -> Result<String, CredentialError> {
        let source = &self.source;
        let result = retry_on_transient(self.retry.clone(), move |attempt| {
            tracing::debug!(attempt = attempt, "Requesting access token");
            source.fetch_token()
        })
        .await;

        let mut state = self.state.write().await;
        state.attempts += 1;
        match result {
            RetryResult::Success(issued) => {
                let now = Instant::now();
                let credential = Credential {
                    token: issued.access_token,
                    issued_at: now,
                    expires_at: now + issued.expires_in,
                };
                let token = credential.token.clone();

                state.credential = Some(credential);
                state.last_failure = None;
                state.generation += 1;
                self.refreshes.fetch_add(1, Ordering::Relaxed);

                tracing::info!(
                    expires_in_secs = issued.expires_in.as_secs(),
                    generation = state.generation,
                    "🔑 Access token refreshed"
                );
                Ok(token)
            }
            RetryResult::PermanentFailure(err) => {
                tracing::error!(error = %err, "❌ Credentials rejected, token will not be refreshed again");
                state.credential = None;
                state.rejection = Some(err.clone());
                Err(err)
            }
            RetryResult::Failed(err) => {
                tracing::warn!(error = %err, "Token refresh failed after retries");
                state.last_failure = Some(err.clone());
                Err(err)
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
