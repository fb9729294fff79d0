use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::AppConfig;

/// Load configuration from a file using the config crate.
/// Supports multiple formats: YAML (default), JSON, TOML.
pub fn load_config(config_path: &str) -> Result<AppConfig> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let app_config: AppConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
env: local
httpserver:
  port: 8088
  timeout: 10s
backends:
  - url: "http://127.0.0.1:9001"
rate_limiter:
  enabled: true
  default_capacity: 5
  default_rate: 1
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{yaml_content}").unwrap();

        let cfg = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.httpserver.port, 8088);
        assert_eq!(cfg.backends.len(), 1);
        assert!(cfg.rate_limiter.enabled);
    }

    #[test]
    fn test_load_json_config() {
        let json_content = r#"
{
  "httpserver": { "port": 8090, "timeout": "5s", "idle_timeout": "1m" },
  "backends": [{ "url": "http://127.0.0.1:9001" }]
}
"#;
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{json_content}").unwrap();

        let cfg = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.httpserver.port, 8090);
        assert_eq!(cfg.backends.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config("/nonexistent/switchboard.yaml").is_err());
    }
}
