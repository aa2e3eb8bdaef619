use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::carrier::{framed, Watermark};
use crate::config::Config;
use crate::engine::{serve_connection, ServerContext};
use crate::error::{Result, WispError};

/// Guard to decrement the active connections counter when dropped
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>, notifier: watch::Sender<()>) -> Self {
        Self { counter, notifier }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::Relaxed);
        // Notify when the last connection closes
        if remaining == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Accept carriers and serve each until the process is told to stop.
pub async fn run(config: Arc<Config>) -> Result<()> {
    let ctx = Arc::new(ServerContext::new(&config)?);
    let listener = TcpListener::bind(config.listen).await.map_err(WispError::Io)?;
    let watermark = Watermark::from_config(&config.carrier);

    let active_connections = Arc::new(AtomicUsize::new(0));
    let (connections_closed_tx, mut connections_closed_rx) = watch::channel(());

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        WispError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        WispError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    info!(addr = %config.listen, version = config.wisp.version, "wisp relay listening");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                active_connections.fetch_add(1, Ordering::Relaxed);
                let guard = ConnectionGuard::new(
                    active_connections.clone(),
                    connections_closed_tx.clone(),
                );
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    let channel = framed::spawn(stream, watermark);
                    if let Err(e) = serve_connection(ctx, channel).await {
                        warn!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }

    let active = active_connections.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            active,
            timeout_secs = config.shutdown_secs,
            "waiting for active connections to finish"
        );
        tokio::select! {
            _ = connections_closed_rx.changed() => {
                info!("all connections closed, shutdown complete");
            }
            _ = tokio::time::sleep(Duration::from_secs(config.shutdown_secs)) => {
                warn!(
                    active = active_connections.load(Ordering::Relaxed),
                    "shutdown timeout reached with connections still active"
                );
            }
        }
    }

    info!("wisp relay stopped");
    Ok(())
}
