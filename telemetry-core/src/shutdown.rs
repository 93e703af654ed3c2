use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Returns a token that is cancelled once the process receives a termination signal.
///
/// On Unix, `SIGINT`, `SIGTERM` and `SIGQUIT` are observed. Elsewhere, only Ctrl-C is.
///
/// Cancellation is level-triggered: listeners that check the token after the signal arrived still
/// observe it. Must be called from within a Tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => info!(signal, "Received termination signal, shutting down."),
            Err(e) => {
                error!(error = %e, "Failed to listen for termination signals, shutting down.")
            }
        }
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
