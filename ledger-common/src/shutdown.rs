use std::future::Future;

use tokio::signal;
use tracing::info;

/// Registers the SIGTERM and SIGINT handlers, returning a future that completes on the first of
/// either signal.
pub fn graceful_shutdown() -> Result<impl Future<Output = ()> + Send + 'static, std::io::Error> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };

        info!("Shutting down gracefully...");
    })
}
