//! Periodic health probing of the backend registry.
//!
//! Each tick snapshots the registry and fires one concurrent probe per
//! backend. Probes are fire-and-forget: a tick never waits for the previous
//! tick's probes, and each probe updates only the single backend it targets.
use std::{sync::Arc, time::Duration};

use crate::{
    config::models::HealthCheckerConfig,
    core::{backend::Backend, registry::Balancer},
    ports::http_client::HttpClient,
    utils::graceful_shutdown::ShutdownToken,
};

pub struct HealthChecker {
    balancer: Arc<dyn Balancer>,
    http_client: Arc<dyn HttpClient>,
    interval: Duration,
    health_path: String,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        balancer: Arc<dyn Balancer>,
        http_client: Arc<dyn HttpClient>,
        config: &HealthCheckerConfig,
    ) -> Self {
        let mut health_path = config.health_path.clone();
        if health_path.is_empty() {
            health_path = "/health".to_string();
        }
        if !health_path.starts_with('/') {
            health_path.insert(0, '/');
        }

        Self {
            balancer,
            http_client,
            interval: config.interval,
            health_path,
            timeout: config.timeout,
        }
    }

    /// Probe all backends once immediately, then on every interval tick until
    /// the shutdown token fires. In-flight probes complete on their own.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        tracing::info!(
            interval = ?self.interval,
            path = %self.health_path,
            timeout = ?self.timeout,
            "health checker started"
        );

        self.check_all_backends();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all_backends(),
                _ = shutdown.wait_for_shutdown() => break,
            }
        }
        tracing::info!("health checker stopped");
    }

    fn check_all_backends(&self) {
        for backend in self.balancer.snapshot() {
            let client = Arc::clone(&self.http_client);
            let url = format!(
                "{}://{}{}",
                backend.scheme(),
                backend.authority(),
                self.health_path
            );
            let timeout = self.timeout;
            tokio::spawn(probe_backend(client, backend, url, timeout));
        }
    }
}

/// Run one probe and apply the liveness transition it implies.
async fn probe_backend(
    client: Arc<dyn HttpClient>,
    backend: Arc<Backend>,
    url: String,
    timeout: Duration,
) {
    let was_healthy = !backend.is_down();

    match client.probe(&url, timeout).await {
        Ok(true) => {
            if !was_healthy {
                tracing::info!(url = %backend.url(), "backend is back online");
                backend.mark_healthy();
            }
        }
        Ok(false) => {
            if was_healthy {
                tracing::warn!(url = %backend.url(), "backend is unhealthy");
                backend.mark_down();
            }
        }
        Err(err) => {
            if was_healthy {
                tracing::warn!(url = %backend.url(), error = %err, "backend is down");
                backend.mark_down();
            }
        }
    }
}
