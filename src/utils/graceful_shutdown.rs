use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast};

/// Coordinates graceful shutdown across the listener and background tasks.
///
/// One broadcast fan-outs the shutdown signal; every consumer holds a
/// [`ShutdownToken`]. After broadcasting, the driver awaits in-flight work up
/// to the grace period.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
    grace_period: Duration,
}

impl GracefulShutdown {
    /// Default 5-second grace period.
    pub fn new() -> Self {
        Self::with_grace_period(Duration::from_secs(5))
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Broadcast shutdown to every token holder. Later calls are no-ops.
    pub fn trigger_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("shutdown initiated");
            let _ = self.shutdown_tx.send(());
        } else {
            tracing::warn!("shutdown already initiated, ignoring signal");
        }
    }

    /// Listen for SIGINT / SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
        }
        self.trigger_shutdown();
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait_for_shutdown_signal(&self) {
        self.shutdown_token().wait_for_shutdown().await;
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C is available off Unix.
    std::future::pending::<()>().await;
}

/// A cheap handle background tasks select on.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Resolve once shutdown is triggered. A token minted or cloned after the
    /// trigger resolves immediately.
    pub async fn wait_for_shutdown(&mut self) {
        if self.is_shutdown_initiated() {
            return;
        }
        // Err means the sender is gone, which is shutdown too.
        let _ = self.receiver.recv().await;
    }
}
