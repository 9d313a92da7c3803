// Authentication manager

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{AuthError, Result, TransportError};
use crate::http_client::HttpTransport;

use super::clock::SystemClock;
use super::events::{AuthEvent, AuthEventSink, RefreshTrigger, TracingEventSink};
use super::login;
use super::store::CredentialStore;
use super::types::{AuthRequest, AuthState, Credential, TokenInfo, TokenStatus};

/// A login shared by every caller that asked for one while it was running
type LoginFlight = Shared<BoxFuture<'static, Result<Arc<Credential>>>>;

/// What the manager needs to know about the remote login endpoint
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Full login URL
    pub auth_url: String,

    pub request: AuthRequest,

    /// Used when the server does not declare a lifetime
    pub default_lifetime: Duration,
}

/// Authentication manager
/// Manages token lifecycle with single-flight refresh and thread-safe access.
///
/// Cloning is cheap; all clones share the same store, state and in-flight login.
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: HttpTransport,

    store: Arc<CredentialStore>,

    events: Arc<dyn AuthEventSink>,

    settings: AuthSettings,

    state: Mutex<AuthState>,

    /// At most one login runs at a time
    in_flight: Mutex<Option<LoginFlight>>,
}

impl AuthManager {
    /// Create a manager that reports auth events through `tracing`
    pub fn new(transport: HttpTransport, store: Arc<CredentialStore>, settings: AuthSettings) -> Self {
        Self::with_event_sink(transport, store, settings, Arc::new(TracingEventSink))
    }

    pub fn with_event_sink(
        transport: HttpTransport,
        store: Arc<CredentialStore>,
        settings: AuthSettings,
        events: Arc<dyn AuthEventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                events,
                settings,
                state: Mutex::new(AuthState::Unauthenticated),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Wire up transport, store and settings from configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let transport = HttpTransport::new(config.retry_policy())?;
        let store = Arc::new(CredentialStore::new(
            config.safety_margin(),
            Arc::new(SystemClock),
        ));
        let settings = AuthSettings {
            auth_url: config.auth_url(),
            request: config.auth_request(),
            default_lifetime: config.default_token_lifetime(),
        };

        Ok(Self::new(transport, store, settings))
    }

    /// Authenticate against the remote service.
    ///
    /// Joins the running login if there is one. The exchange itself runs on a
    /// spawned task, so dropping the returned future does not cancel it.
    pub async fn login(&self) -> Result<Arc<Credential>> {
        self.join_or_start(None).await
    }

    /// Current credential if still valid, otherwise a (shared) login
    pub async fn refresh_if_needed(&self) -> Result<Arc<Credential>> {
        self.refresh_for(RefreshTrigger::OnDemand).await
    }

    /// `refresh_if_needed` on behalf of `trigger`, reported only when a new
    /// login actually starts
    pub(crate) async fn refresh_for(&self, trigger: RefreshTrigger) -> Result<Arc<Credential>> {
        self.join_or_start(Some(trigger)).await
    }

    /// Get a valid bearer token, refreshing if necessary.
    ///
    /// Valid tokens are returned without touching the network. If a refresh of
    /// an expiring token fails, the old token is still handed out until it
    /// actually expires.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let store = &self.inner.store;
        let current = store.current();
        let status = store.status_of(current.as_deref(), store.now());

        if let (TokenStatus::Valid, Some(cred)) = (status, current.as_ref()) {
            return Ok(cred.token().to_string());
        }

        if let AuthState::Failed(err @ AuthError::InvalidCredentials { .. }) = self.state() {
            tracing::debug!("Not retrying login with rejected credentials");
            return Err(err);
        }

        match self.refresh_if_needed().await {
            Ok(cred) => Ok(cred.token().to_string()),
            Err(e) => {
                // Graceful degradation: if token isn't actually expired yet, use it
                if let Some(cred) = store.current() {
                    if store.now() < cred.expires_at() {
                        tracing::warn!(
                            error = %e,
                            "Using existing token despite refresh failure (not yet expired)"
                        );
                        return Ok(cred.token().to_string());
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop the credential and return to `Unauthenticated`
    pub fn logout(&self) {
        self.inner.store.clear();
        self.inner.set_state(AuthState::Unauthenticated);
        tracing::info!("Logged out");
    }

    pub fn state(&self) -> AuthState {
        lock(&self.inner.state).clone()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Current credential is present and outside the safety margin
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.status() == TokenStatus::Valid
    }

    /// Whole minutes until the current credential expires, 0 without one
    pub fn token_expires_in_minutes(&self) -> i64 {
        let store = &self.inner.store;
        store
            .current()
            .map(|cred| cred.remaining(store.now()).num_minutes())
            .unwrap_or(0)
    }

    pub fn token_info(&self) -> TokenInfo {
        let status = self.inner.store.status();
        TokenInfo {
            status,
            expires_in_minutes: self.token_expires_in_minutes(),
            needs_refresh: status != TokenStatus::Valid,
        }
    }

    /// Join the running login or start one. With a `trigger`, a credential
    /// that is still valid is returned as is.
    async fn join_or_start(&self, trigger: Option<RefreshTrigger>) -> Result<Arc<Credential>> {
        let flight = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining in-flight login");
                    flight.clone()
                }
                None => {
                    if let Some(trigger) = trigger {
                        // A login that just finished has already stored its credential
                        let store = &self.inner.store;
                        let current = store.current();
                        let status = store.status_of(current.as_deref(), store.now());
                        if let (TokenStatus::Valid, Some(cred)) = (status, current) {
                            return Ok(cred);
                        }

                        self.inner
                            .events
                            .record(&AuthEvent::RefreshTriggered { trigger, status });
                    }

                    let flight = self.start_login();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Must be called with the in-flight slot locked
    fn start_login(&self) -> LoginFlight {
        self.inner.set_state(AuthState::Authenticating);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _guard = FlightGuard {
                inner: Arc::clone(&inner),
            };
            inner.perform_login().await
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(AuthError::ServiceUnavailable(TransportError::ConnectionFailed(
                    format!("Login task failed: {}", e),
                ))),
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn perform_login(&self) -> Result<Arc<Credential>> {
        self.events.record(&AuthEvent::AuthAttempt {
            username: self.settings.request.username.clone(),
        });

        let result = login::request_token(
            &self.transport,
            &self.settings.auth_url,
            &self.settings.request,
            self.store.clock().as_ref(),
            self.settings.default_lifetime,
        )
        .await;

        match result {
            Ok(cred) => {
                let cred = Arc::new(cred);
                self.store.set(Arc::clone(&cred));
                self.set_state(AuthState::Authenticated);
                self.events.record(&AuthEvent::AuthSuccess {
                    expires_in_minutes: cred.lifetime().num_minutes(),
                });
                Ok(cred)
            }
            Err(e) => {
                if let AuthError::InvalidCredentials { .. } = e {
                    // Nothing issued under rejected credentials stays usable
                    self.store.clear();
                }
                self.set_state(AuthState::Failed(e.clone()));
                self.events.record(&AuthEvent::AuthFailure {
                    reason: e.reason(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn set_state(&self, next: AuthState) {
        let mut state = lock(&self.state);
        if *state != next {
            tracing::debug!(from = state.as_str(), to = next.as_str(), "Auth state transition");
        }
        *state = next;
    }
}

/// Frees the in-flight slot when the login task ends, including by panic or
/// runtime shutdown. A login that never reached a verdict is recorded as failed.
struct FlightGuard {
    inner: Arc<Inner>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let unfinished = {
            let mut state = lock(&self.inner.state);
            if *state == AuthState::Authenticating {
                let err = AuthError::ServiceUnavailable(TransportError::ConnectionFailed(
                    "Login task ended without a result".to_string(),
                ));
                *state = AuthState::Failed(err.clone());
                Some(err)
            } else {
                None
            }
        };

        if let Some(err) = unfinished {
            tracing::error!(error = %err, "Login task ended without a result");
            self.inner.events.record(&AuthEvent::AuthFailure {
                reason: err.reason(),
                message: err.to_string(),
            });
        }

        // State first: a new login may start as soon as the slot is empty
        *lock(&self.inner.in_flight) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::types::ApiKey;
    use crate::http_client::RetryPolicy;
    use chrono::{TimeZone, Utc};

    fn manager_at(clock: Arc<ManualClock>) -> AuthManager {
        let transport = HttpTransport::new(RetryPolicy::default()).unwrap();
        let store = Arc::new(CredentialStore::new(Duration::minutes(5), clock));
        AuthManager::new(
            transport,
            store,
            AuthSettings {
                auth_url: "http://127.0.0.1:9/api/Auth/loginKey".to_string(),
                request: AuthRequest {
                    username: "trader".to_string(),
                    api_key: ApiKey::new("key"),
                },
                default_lifetime: Duration::hours(1),
            },
        )
    }

    #[tokio::test]
    async fn test_valid_token_needs_no_network() {
        let start = Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let manager = manager_at(clock.clone());

        let cred = Credential::new("cached", start, Duration::minutes(58)).unwrap();
        manager.store().set(Arc::new(cred));

        // The auth URL is unreachable, so any network call would fail
        assert_eq!(manager.ensure_valid_token().await.unwrap(), "cached");
        assert!(manager.is_authenticated());
        assert_eq!(manager.token_expires_in_minutes(), 58);
    }

    #[test]
    fn test_token_info() {
        let start = Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let manager = manager_at(clock.clone());

        let info = manager.token_info();
        assert_eq!(info.status, TokenStatus::Absent);
        assert_eq!(info.expires_in_minutes, 0);
        assert!(info.needs_refresh);

        let cred = Credential::new("cached", start, Duration::minutes(58)).unwrap();
        manager.store().set(Arc::new(cred));
        clock.advance(Duration::minutes(54));

        let info = manager.token_info();
        assert_eq!(info.status, TokenStatus::Expiring);
        assert_eq!(info.expires_in_minutes, 4);
        assert!(info.needs_refresh);
    }

    #[test]
    fn test_logout_clears_store() {
        let start = Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap();
        let manager = manager_at(Arc::new(ManualClock::new(start)));
        let cred = Credential::new("cached", start, Duration::minutes(58)).unwrap();
        manager.store().set(Arc::new(cred));
        manager.inner.set_state(AuthState::Authenticated);

        manager.logout();

        assert!(manager.store().current().is_none());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_panicked_login_task_frees_slot() {
        let start = Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap();
        let manager = manager_at(Arc::new(ManualClock::new(start)));

        let stale: LoginFlight =
            futures::future::ready(Err(AuthError::MalformedResponse("stale".to_string())))
                .boxed()
                .shared();
        *lock(&manager.inner.in_flight) = Some(stale);
        manager.inner.set_state(AuthState::Authenticating);

        let inner = Arc::clone(&manager.inner);
        let handle = tokio::spawn(async move {
            let _guard = FlightGuard { inner };
            panic!("login task blew up");
        });
        assert!(handle.await.is_err());

        assert!(lock(&manager.inner.in_flight).is_none());
        let state = manager.state();
        assert!(
            matches!(state, AuthState::Failed(AuthError::ServiceUnavailable(_))),
            "{:?}",
            state
        );
        assert!(!state.is_terminal_failure());
    }

    #[test]
    fn test_flight_guard_keeps_finished_state() {
        let start = Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap();
        let manager = manager_at(Arc::new(ManualClock::new(start)));
        manager.inner.set_state(AuthState::Authenticated);

        drop(FlightGuard {
            inner: Arc::clone(&manager.inner),
        });

        assert_eq!(manager.state(), AuthState::Authenticated);
        assert!(lock(&manager.inner.in_flight).is_none());
    }
}
