use eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::models::Env;

/// Initialize structured logging for the selected environment.
///
/// `local` gets a pretty console layer at debug level; `prod` gets JSON at
/// info level. `RUST_LOG` overrides the default filter in both cases.
pub fn init_tracing(env: Env) -> Result<()> {
    match env {
        Env::Local => {
            Registry::default()
                .with(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("debug")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init()?;
        }
        Env::Prod => {
            Registry::default()
                .with(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_span_list(false)
                        .with_target(true),
                )
                .try_init()?;
        }
    }

    tracing::info!(?env, "structured logging initialized");
    Ok(())
}
