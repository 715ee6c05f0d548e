//! OS signal handling.
//!
//! - SIGINT / SIGTERM: graceful shutdown
//! - SIGHUP: configuration reload, not shutdown

use crate::config::watcher::ReloadHandle;
use crate::lifecycle::shutdown::ShutdownSignal;

/// Wait for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}

/// Forward SIGHUP to the config watcher until `shutdown` fires.
#[cfg(unix)]
pub fn spawn_reload_on_hangup(
    reload: ReloadHandle,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGHUP received, reloading configuration");
                    reload.request_reload();
                }
                _ = shutdown.recv() => break,
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_on_hangup(
    _reload: ReloadHandle,
    _shutdown: ShutdownSignal,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async {}))
}
