//! Termination signals that end the chat server.

use tokio::signal;

/// Completes with the name of the first termination signal received.
///
/// SIGINT and SIGTERM stop the server on Unix, Ctrl+C elsewhere. Fails only
/// if the handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}
