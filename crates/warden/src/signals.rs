//! Signal handling for graceful node shutdown.
//!
//! Listens for termination signals (SIGINT and SIGTERM on Unix; Ctrl+C on
//! Windows) and resolves when one arrives.

use tokio::signal;
use tracing::info;

/// Resolves when a shutdown signal is received.
pub async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
    }

    info!("📡 received shutdown signal");
    Ok(())
}
