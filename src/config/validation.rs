use crate::config::models::AppConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed:\n{message}")]
    ValidationFailed { message: String },
}

/// Startup validator for the application configuration.
pub struct AppConfigValidator;

impl AppConfigValidator {
    /// Validate the entire configuration, collecting every problem found.
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.httpserver.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: "httpserver.port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }

        for backend in &config.backends {
            if let Err(e) = Self::validate_backend_url(&backend.url) {
                errors.push(e);
            }
        }

        if config.rate_limiter.default_capacity < 0.0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limiter.default_capacity".to_string(),
                message: "capacity must not be negative".to_string(),
            });
        }
        if config.rate_limiter.default_rate < 0.0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limiter.default_rate".to_string(),
                message: "rate must not be negative".to_string(),
            });
        }

        if config.rate_limiter.enabled && config.storage.file_path.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "storage.file_path".to_string(),
                message: "a storage path is required when rate limiting is enabled".to_string(),
            });
        }

        if config.proxy.max_retries == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.max_retries".to_string(),
                message: "at least one attempt per backend is required".to_string(),
            });
        }
        if config.proxy.max_backends == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.max_backends".to_string(),
                message: "at least one backend attempt is required".to_string(),
            });
        }
        if config.proxy.connection_pool_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.connection_pool_size".to_string(),
                message: "the transport pool needs at least one slot".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_backend_url(url: &str) -> ValidationResult<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidBackendUrl {
                url: url.to_string(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        match url.parse::<http::Uri>() {
            Ok(parsed) if parsed.host().is_some() => Ok(()),
            Ok(_) => Err(ValidationError::InvalidBackendUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            }),
            Err(e) => Err(ValidationError::InvalidBackendUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
