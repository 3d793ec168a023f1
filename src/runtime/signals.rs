//! Termination signal wait used by [`Server::run_until_signal`](crate::Server::run_until_signal).
//!
//! Unix: SIGINT, SIGTERM and SIGQUIT. Elsewhere: Ctrl-C only.

use tracing::info;

#[cfg(unix)]
pub(crate) async fn terminated() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = name, "termination signal received");
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn terminated() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl_c", "termination signal received");
    Ok(())
}
