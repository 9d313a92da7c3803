// Error handling module
// Defines the transport and authentication error taxonomy

use thiserror::Error;

/// Failures surfaced by the HTTP transport after its retry policy has run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not connect, or the request failed before a response arrived
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The per-request timeout elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Remote answered with a non-success status
    #[error("HTTP error: {status} - {body}")]
    HttpError { status: u16, body: String },

    /// Every attempt failed transiently
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ConnectionFailed(_) | TransportError::Timeout(_) => true,
            TransportError::HttpError { status, .. } => is_transient_status(*status),
            TransportError::RetriesExhausted { .. } => false,
        }
    }

    /// HTTP status carried by this error, looking through `RetriesExhausted`
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpError { status, .. } => Some(*status),
            TransportError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// 429 and 5xx are worth retrying; every other status is final
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Coarse failure class, exposed to logging and to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    InvalidCredentials,
    ServiceUnavailable,
    MalformedResponse,
}

impl AuthFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailureReason::InvalidCredentials => "invalid_credentials",
            AuthFailureReason::ServiceUnavailable => "service_unavailable",
            AuthFailureReason::MalformedResponse => "malformed_response",
        }
    }
}

impl std::fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication errors surfaced to callers of the auth manager.
///
/// Cloneable so that every waiter on a shared in-flight login receives the
/// same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Remote rejected the username/API key pair
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// Remote could not be reached or kept failing
    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(#[source] TransportError),

    /// Remote answered but the body did not match the expected contract
    #[error("Malformed authentication response: {0}")]
    MalformedResponse(String),
}

impl AuthError {
    pub fn reason(&self) -> AuthFailureReason {
        match self {
            AuthError::InvalidCredentials { .. } => AuthFailureReason::InvalidCredentials,
            AuthError::ServiceUnavailable(_) => AuthFailureReason::ServiceUnavailable,
            AuthError::MalformedResponse(_) => AuthFailureReason::MalformedResponse,
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err.status() {
            Some(401) | Some(403) => AuthError::InvalidCredentials {
                message: err.to_string(),
            },
            _ => AuthError::ServiceUnavailable(err),
        }
    }
}

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
