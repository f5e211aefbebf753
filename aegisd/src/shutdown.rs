use aegis_core::wait::CancelHandle;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

/// Wait for SIGTERM or SIGINT, then stop the server and cancel in-flight audits.
pub async fn signal_listener(shutdown_tx: watch::Sender<bool>, audits: CancelHandle) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(err), _) | (_, Err(err)) => {
            error!(error = %err, "failed to register signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
    }

    audits.cancel();
    let _ = shutdown_tx.send(true);
}
