// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::error::AuthError;

/// A bearer token together with its validity window.
///
/// Only constructible with a positive lifetime, so `expires_at > issued_at`
/// always holds. Never mutated: a refresh produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns `None` when `lifetime` is zero or negative, or the expiry
    /// falls outside the representable date range
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>, lifetime: Duration) -> Option<Self> {
        if lifetime <= Duration::zero() {
            return None;
        }

        Some(Self {
            token: token.into(),
            issued_at,
            expires_at: issued_at.checked_add_signed(lifetime)?,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Server-declared lifetime
    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }

    /// Time left at `now`, clamped at zero
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Validity of the current credential, always computed at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Absent,
    Valid,
    /// Inside the safety margin; eligible for proactive refresh
    Expiring,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Absent => "absent",
            TokenStatus::Valid => "valid",
            TokenStatus::Expiring => "expiring",
            TokenStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API key that never shows up in logs or debug output
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for the wire body only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Login request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    #[serde(rename = "userName")]
    pub username: String,

    #[serde(rename = "apiKey")]
    pub api_key: ApiKey,
}

/// Authentication state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Last attempt failed; `InvalidCredentials` is only left by an explicit login
    Failed(AuthError),
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed(_) => "failed",
        }
    }

    /// True when automatic paths must not retry on their own
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, AuthState::Failed(AuthError::InvalidCredentials { .. }))
    }
}

/// Diagnostic snapshot of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub status: TokenStatus,
    pub expires_in_minutes: i64,
    pub needs_refresh: bool,
}
