// Auth outcome events
// The core only produces these; formatting and emission belong to the sink

use crate::error::AuthFailureReason;

use super::types::TokenStatus;

/// What caused a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Background refresh scheduler
    Scheduler,
    /// A caller asked for a token that was not valid
    OnDemand,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Scheduler => "scheduler",
            RefreshTrigger::OnDemand => "on_demand",
        }
    }
}

/// Structured authentication event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    AuthAttempt {
        username: String,
    },
    AuthSuccess {
        expires_in_minutes: i64,
    },
    AuthFailure {
        reason: AuthFailureReason,
        message: String,
    },
    RefreshTriggered {
        trigger: RefreshTrigger,
        status: TokenStatus,
    },
}

impl AuthEvent {
    /// Stable event name for log pipelines
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::AuthAttempt { .. } => "auth_attempt",
            AuthEvent::AuthSuccess { .. } => "auth_success",
            AuthEvent::AuthFailure { .. } => "auth_failure",
            AuthEvent::RefreshTriggered { .. } => "refresh_triggered",
        }
    }
}

/// Receiver of auth events
pub trait AuthEventSink: Send + Sync {
    fn record(&self, event: &AuthEvent);
}

/// Default sink: one structured `tracing` event per auth event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl AuthEventSink for TracingEventSink {
    fn record(&self, event: &AuthEvent) {
        let name = event.name();
        match event {
            AuthEvent::AuthAttempt { username } => {
                tracing::info!(event = name, username = %username, "Attempting authentication");
            }
            AuthEvent::AuthSuccess { expires_in_minutes } => {
                tracing::info!(
                    event = name,
                    expires_in_minutes = *expires_in_minutes,
                    "Authentication successful"
                );
            }
            AuthEvent::AuthFailure { reason, message } => {
                tracing::error!(
                    event = name,
                    reason = reason.as_str(),
                    error = %message,
                    "Authentication failed"
                );
            }
            AuthEvent::RefreshTriggered { trigger, status } => {
                tracing::info!(
                    event = name,
                    trigger = trigger.as_str(),
                    status = status.as_str(),
                    "Token refresh triggered"
                );
            }
        }
    }
}
