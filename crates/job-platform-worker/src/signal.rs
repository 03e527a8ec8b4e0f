//! Process shutdown signals.

use std::future::Future;
use std::io;
use tracing::error;

/// Wait for a signal listener to fire.
///
/// A listener that fails to install never resolves, so the process keeps
/// running instead of reading the failure as a shutdown request.
pub async fn signal_or_pending<F>(name: &str, listener: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = listener.await {
        error!(signal = name, error = %e, "Cannot listen for signal");
        futures::future::pending::<()>().await;
    }
}

/// Resolve with the name of the first shutdown signal received
#[cfg(unix)]
pub async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = async {
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok::<_, io::Error>(())
    };

    tokio::select! {
        _ = signal_or_pending("SIGINT", tokio::signal::ctrl_c()) => "SIGINT",
        _ = signal_or_pending("SIGTERM", sigterm) => "SIGTERM",
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> &'static str {
    signal_or_pending("ctrl-c", tokio::signal::ctrl_c()).await;
    "ctrl-c"
}
