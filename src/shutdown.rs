//! Signal-driven shutdown.
//!
//! Translates SIGINT and SIGTERM into cancellation of the shared token,
//! so long-running components (the monitor loops, worker pools) wind
//! down at a clean point instead of being killed mid-write.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Waits for SIGINT or SIGTERM and cancels `token`.
///
/// Stays alive after the first signal to log (and ignore) repeats while
/// components drain; a second signal does not escalate.
pub async fn handle_signals(token: CancellationToken) {
    let mut cancelled = false;
    loop {
        let signal = wait_for_signal().await;
        if cancelled {
            warn!(signal, "Already shutting down, signal ignored");
            continue;
        }
        info!(signal, "Shutdown signal received");
        token.cancel();
        cancelled = true;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };

    loop {
        match sigterm {
            Some(ref mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => return "SIGINT",
                    _ = term.recv() => return "SIGTERM",
                }
            }
            None => {
                if tokio::signal::ctrl_c().await.is_ok() {
                    return "SIGINT";
                }
                // ctrl_c failed too; nothing to wait on
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    loop {
        if tokio::signal::ctrl_c().await.is_ok() {
            return "SIGINT";
        }
        std::future::pending::<()>().await;
    }
}
