use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::Instant;

use crate::server::AppState;
use crate::workflow::RunId;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Let in-flight runs finish, up to the configured grace period.
///
/// Runs are never cancelled mid-phase; any still running when the grace
/// period lapses are reported and left to die with the process.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");
    state.close_run_permits();

    let grace = Duration::from_secs(state.config.server.shutdown_grace_secs);
    let remaining = drain_in_flight(state, grace).await;

    if remaining.is_empty() {
        tracing::info!("Graceful shutdown complete");
        return;
    }

    for run_id in &remaining {
        tracing::warn!(run_id = %run_id, "Run still in flight at shutdown");
    }
    tracing::warn!(
        count = remaining.len(),
        grace_secs = grace.as_secs(),
        "Grace period lapsed with runs in flight"
    );
}

/// Poll until no runs are in flight or `grace` elapses. Returns the runs left.
pub async fn drain_in_flight(state: &AppState, grace: Duration) -> Vec<RunId> {
    let deadline = Instant::now() + grace;

    loop {
        let in_flight = state.in_flight_runs().await;
        if in_flight.is_empty() || Instant::now() >= deadline {
            return in_flight;
        }

        tracing::info!(count = in_flight.len(), "Waiting for in-flight runs to finish");
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
