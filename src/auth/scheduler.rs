// Background token refresh

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::events::RefreshTrigger;
use super::manager::AuthManager;
use super::types::{AuthState, TokenStatus};

/// Periodically checks the credential store and refreshes before expiry.
///
/// Wakes every `check_interval`, or earlier when the current credential is
/// about to enter its safety margin.
pub struct RefreshScheduler {
    manager: AuthManager,
    check_interval: Duration,
}

impl RefreshScheduler {
    pub fn new(manager: AuthManager, check_interval: Duration) -> Self {
        Self {
            manager,
            check_interval,
        }
    }

    /// Start the background task
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));

        SchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            check_interval_secs = self.check_interval.as_secs_f64(),
            "Refresh scheduler started"
        );

        loop {
            self.check_once().await;

            let wait = self.next_wake();
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Scheduler sleeping");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }

    /// Inspect the store once and refresh if the credential needs it.
    ///
    /// Returns the status that was observed before any refresh. Failures are
    /// logged, never propagated; the next wake tries again.
    pub async fn check_once(&self) -> TokenStatus {
        let status = self.manager.store().status();

        match status {
            TokenStatus::Valid => return status,
            TokenStatus::Absent => {
                // Nothing to keep alive after a logout
                if self.manager.state() == AuthState::Unauthenticated {
                    return status;
                }
            }
            TokenStatus::Expired => {
                tracing::warn!("Token expired before scheduled refresh, re-authenticating");
            }
            TokenStatus::Expiring => {}
        }

        if self.manager.state().is_terminal_failure() {
            tracing::warn!("Skipping scheduled refresh: credentials were rejected, login required");
            return status;
        }

        match self.manager.refresh_for(RefreshTrigger::Scheduler).await {
            Ok(cred) => {
                tracing::info!(
                    expires_at = %cred.expires_at().to_rfc3339(),
                    "Scheduled token refresh complete"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reason = e.reason().as_str(),
                    "Scheduled token refresh failed, will retry on next wake"
                );
            }
        }

        status
    }

    /// Time until the next check
    pub fn next_wake(&self) -> Duration {
        let store = self.manager.store();
        let Some(cred) = store.current() else {
            return self.check_interval;
        };

        let Some(margin_starts) = cred.expires_at().checked_sub_signed(store.safety_margin()) else {
            return self.check_interval;
        };

        match (margin_starts - store.now()).to_std() {
            Ok(d) if !d.is_zero() => self.check_interval.min(d),
            // Already inside the margin: a refresh just ran or failed, so back off
            _ => self.check_interval,
        }
    }
}

/// Handle to a running scheduler; dropping it also stops the task
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal the task to stop and wait for it. A refresh in progress completes first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "Refresh scheduler task failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
