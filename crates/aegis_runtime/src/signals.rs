//! Cross-platform graceful-shutdown signal handling, following the
//! teacher's `horizon::signals` shape.

use tokio::signal;
use tracing::info;

/// Resolves once SIGINT or SIGTERM (Unix) or Ctrl+C (Windows) arrives.
pub async fn wait_for_shutdown_signal() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => (),
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    info!("shutdown signal received");
    Ok(())
}
