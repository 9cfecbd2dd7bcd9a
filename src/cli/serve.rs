//! HTTP API server command.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use vpsman::{Error, LifecycleManager, Result};

/// Wait for the reconcile task after the server stops.
const RECONCILE_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Start the HTTP API server for programmatic control.
#[derive(Parser, Debug)]
#[command(about = "Start the HTTP API server for programmatic instance management")]
#[command(after_long_help = "\
Instances persist independently of the server - they keep running when it stops.

API ENDPOINTS:
  GET    /health                                Health check
  POST   /api/v1/instances[?privileged=true]    Create instance
  GET    /api/v1/instances[?owner=ID]           List instances
  GET    /api/v1/instances/:id                  Get instance
  DELETE /api/v1/instances/:id                  Delete instance
  POST   /api/v1/instances/:id/start            Start instance
  POST   /api/v1/instances/:id/stop             Stop instance
  POST   /api/v1/instances/:id/restart          Restart instance
  POST   /api/v1/instances/:id/credential       Rotate password
  GET    /api/v1/instances/:id/logs[?lines=N]   Tail console log
  GET    /api/v1/instances/:id/stats            Resource usage
  POST   /api/v1/maintenance/sweep              Remove orphaned files
  GET    /api/v1/usage                          Totals and counters
  GET    /api/v1/host/check                     Host dependency check

EXAMPLES:
  vpsman serve                         Listen on 127.0.0.1:8080 (default)
  vpsman serve -l 0.0.0.0:9000         Listen on all interfaces, port 9000")]
pub struct ServeCmd {
    /// Address and port to listen on
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:8080",
        value_name = "ADDR:PORT"
    )]
    listen: String,
}

impl ServeCmd {
    /// Run the serve command.
    pub async fn run(self, manager: Arc<LifecycleManager>) -> Result<()> {
        let addr: SocketAddr = self.listen.parse().map_err(|e| {
            Error::Config(format!("invalid listen address '{}': {}", self.listen, e))
        })?;

        if addr.ip().is_unspecified() {
            eprintln!(
                "WARNING: Server is listening on all interfaces ({}).",
                addr.ip()
            );
            eprintln!("         The API has no authentication - any network client can control this host.");
            eprintln!("         Consider using --listen 127.0.0.1:8080 for local-only access.");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconcile_handle = tokio::spawn(reconcile_loop(manager.clone(), shutdown_rx));

        let app = vpsman::api::create_router(manager);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(address = %addr, "starting HTTP API server");
        println!("vpsman API server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let _ = shutdown_tx.send(true);
        let _ = tokio::time::timeout(RECONCILE_SHUTDOWN_WAIT, reconcile_handle).await;

        Ok(())
    }
}

/// Periodically correct `Running` rows whose process has gone away.
async fn reconcile_loop(manager: Arc<LifecycleManager>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(manager.config().timeouts.reconcile_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; open() already reconciled.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.reconcile().await {
                    Ok(corrected) if !corrected.is_empty() => {
                        tracing::info!(count = corrected.len(), ids = ?corrected, "reconciled stopped instances");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "reconcile failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("reconcile loop stopped");
}

/// Wait for shutdown signal.
/// Instances are NOT stopped on server shutdown; they run independently.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    eprintln!("\nShutting down server (instances continue running)...");
}
