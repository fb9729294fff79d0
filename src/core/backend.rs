use std::{
    fmt,
    str::FromStr,
    sync::{PoisonError, RwLock},
};

use http::Uri;
use thiserror::Error;

use crate::config::models::BackendConfig;

/// Errors related to backend construction
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when URL is invalid
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// An upstream HTTP origin.
///
/// Identity is the absolute URL it was configured with; the liveness flag is
/// the only mutable state and is flipped by the health checker and by the
/// retrying transport's give-up path.
#[derive(Debug)]
pub struct Backend {
    uri: Uri,
    url: String,
    down: RwLock<bool>,
}

impl Backend {
    /// Parse and validate an absolute `http://` / `https://` URL.
    pub fn new(url: &str) -> BackendResult<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(BackendError::InvalidUrl(format!(
                    "Backend URL must start with http:// or https://, got: {url}"
                )));
            }
        }
        if uri.host().is_none() {
            return Err(BackendError::InvalidUrl(format!("missing host: {url}")));
        }

        Ok(Self {
            uri,
            url: url.to_string(),
            down: RwLock::new(false),
        })
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Self::new(&config.url)
    }

    /// The exact URL string this backend was configured with.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn scheme(&self) -> &str {
        self.uri.scheme_str().unwrap_or("http")
    }

    /// `host[:port]` of the backend URL.
    pub fn authority(&self) -> &str {
        self.uri
            .authority()
            .map(|a| a.as_str())
            .unwrap_or_default()
    }

    pub fn is_down(&self) -> bool {
        *self.down.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the backend ineligible for selection. Idempotent.
    pub fn mark_down(&self) {
        *self.down.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Return the backend to the selectable set. Idempotent.
    pub fn mark_healthy(&self) {
        *self.down.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl FromStr for Backend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::new(s)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
