use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut v) => {
            v.recv().await;
        }
        Err(e) => {
            error!("Can't listen for SIGTERM: {e}");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

/// Cancels `cancellation` on ctrl-c or SIGTERM. Returns early if something else cancelled it.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => info!("Received ctrl-c, stopping"),
        _ = terminate() => info!("Received SIGTERM, stopping"),
        _ = cancellation.cancelled() => return,
    };
    cancellation.cancel();
}
