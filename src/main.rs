use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    eyre::{Context, eyre},
    Result,
};
use switchboard::{
    adapters::build_router,
    config::{self, AppConfigValidator},
    core::{registry::Balancer, Backend, RateLimiter, RoundRobinBalancer},
    ports::http_client::HttpClient,
    tracing_setup,
    utils::GracefulShutdown,
    FileStore, HealthChecker, HttpClientAdapter, ProxyService, TransportPool,
};
use tower_http::timeout::TimeoutLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, default_value = "config/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let cfg = config::load_config(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    tracing_setup::init_tracing(cfg.env)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;
    tracing::info!(config = %args.config, "starting switchboard");

    AppConfigValidator::validate(&cfg).context("Configuration validation failed")?;

    // Backend registry
    let balancer: Arc<dyn Balancer> = Arc::new(RoundRobinBalancer::new());
    for backend_cfg in &cfg.backends {
        match Backend::from_config(backend_cfg) {
            Ok(backend) => balancer.add(backend),
            Err(e) => {
                tracing::error!(url = %backend_cfg.url, error = %e, "failed to create backend");
            }
        }
    }

    // Outbound transports and retrying proxy
    let pool = Arc::new(
        TransportPool::new(&cfg.proxy).context("Failed to create outbound transport pool")?,
    );
    let proxy = Arc::new(ProxyService::new(
        Arc::clone(&balancer),
        Arc::clone(&pool),
        &cfg.proxy,
    ));

    // Graceful shutdown driver and signal handler
    let shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }

    // Health checker
    let probe_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&cfg.proxy.proxy_transport_options)
            .context("Failed to create health probe client")?,
    );
    let health_checker = Arc::new(HealthChecker::new(
        Arc::clone(&balancer),
        probe_client,
        &cfg.health_checker,
    ));
    let health_handle = {
        let checker = Arc::clone(&health_checker);
        let token = shutdown.shutdown_token();
        tokio::spawn(async move { checker.run(token).await })
    };

    // Rate limiter with durable state
    let limiter = if cfg.rate_limiter.enabled {
        let store = Arc::new(
            FileStore::new(&cfg.storage.file_path).with_context(|| {
                format!("Failed to initialize storage at {}", cfg.storage.file_path)
            })?,
        );
        let limiter = Arc::new(RateLimiter::new(&cfg.rate_limiter, store));
        limiter.start();
        tracing::info!(
            default_capacity = cfg.rate_limiter.default_capacity,
            default_rate = cfg.rate_limiter.default_rate,
            "rate limiter initialized"
        );
        Some(limiter)
    } else {
        None
    };

    let header_ip = if cfg.rate_limiter.enabled {
        cfg.rate_limiter.header_ip.as_str()
    } else {
        ""
    };
    let app = build_router(Arc::clone(&proxy), limiter.clone(), header_ip)
        .layer(TimeoutLayer::new(cfg.httpserver.timeout));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.httpserver.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(
        %addr,
        backends = cfg.backends.len(),
        rate_limiter = cfg.rate_limiter.enabled,
        "listening"
    );

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result.context("Server error")?;
        }
        _ = shutdown.wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Drain background work within the grace period.
    let teardown = async {
        if let Some(limiter) = &limiter {
            limiter.stop().await;
        }
        let _ = health_handle.await;
        proxy.close();
    };
    if tokio::time::timeout(shutdown.grace_period(), teardown)
        .await
        .is_err()
    {
        tracing::warn!(
            grace_period = ?shutdown.grace_period(),
            "graceful shutdown timed out"
        );
    }

    tracing::info!("server stopped gracefully");
    Ok(())
}
