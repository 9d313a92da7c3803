use anyhow::Result;

use topstep_session::auth::{AuthManager, RefreshScheduler};
use topstep_session::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!("🚀 Topstep session starting...");
    tracing::info!(
        username = %config.username,
        auth_url = %config.auth_url(),
        "Session configured"
    );
    tracing::debug!(
        max_attempts = config.retry_max_attempts,
        backoff_base_ms = config.retry_backoff_base_ms,
        request_timeout_ms = config.request_timeout_ms,
        safety_margin_min = config.refresh_safety_margin_min,
        "Transport and refresh settings"
    );

    let manager = AuthManager::from_config(&config)?;

    // Fail fast: nothing downstream works without a token
    let credential = match manager.login().await {
        Ok(credential) => credential,
        Err(e) => {
            tracing::error!("❌ Authentication failed: {}", e);
            tracing::error!("");
            tracing::error!("🔧 Troubleshooting steps:");
            tracing::error!("   1. Check your network connection");
            tracing::error!("   2. Verify TOPSTEP_USERNAME and TOPSTEP_API_KEY");
            tracing::error!("   3. Check API_BASE_URL points at the TopstepX gateway");
            tracing::error!("");
            anyhow::bail!("Startup failed: {}", e);
        }
    };

    tracing::info!(
        "✅ Authenticated (token expires in {} min)",
        credential.lifetime().num_minutes()
    );

    let scheduler = RefreshScheduler::new(manager.clone(), config.check_interval()).spawn();
    tracing::info!("✅ Refresh scheduler running");

    shutdown_signal().await;

    scheduler.shutdown().await;
    manager.logout();

    tracing::info!("👋 Shutdown complete");

    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_tracing(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
