//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::ComposerConfig;

const DASHBOARD_URL_ENV: &str = "DRONA_DASHBOARD_URL";
const DRONA_DIR_ENV: &str = "DRONA_DIR";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ComposerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ComposerConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration and apply `DRONA_DASHBOARD_URL` / `DRONA_DIR`
/// overrides. A missing file falls back to defaults plus overrides.
pub fn load_config_with_env(path: Option<&Path>) -> Result<ComposerConfig, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str::<ComposerConfig>(&content)?
        }
        Some(path) => {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            ComposerConfig::default()
        }
        None => ComposerConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut ComposerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(DASHBOARD_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.dashboard.url = url;
    }
    if let Some(dir) = lookup(DRONA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
        config.dashboard.drona_dir = dir;
    }
}

fn validate_config(config: &ComposerConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    let url = config.dashboard.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid(
            "dashboard.url must not be empty".to_string(),
        ));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Invalid(format!(
            "dashboard.url '{}' must use http or https",
            url
        )));
    }

    if config.dashboard.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "dashboard.request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.form.debounce_ms == 0 {
        return Err(ConfigError::Invalid(
            "form.debounce_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_config_accepts_defaults() {
        let config = ComposerConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.form.debounce_ms, 300);
        assert_eq!(config.form.autocomplete_min_chars, 2);
    }

    #[test]
    fn test_validate_config_rejects_non_http_url() {
        let mut config = ComposerConfig::default();
        config.dashboard.url = "ftp://example.org".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_config_rejects_zero_debounce() {
        let mut config = ComposerConfig::default();
        config.form.debounce_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_config_reads_sections_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "dashboard:\n  url: https://portal.example.edu/drona/\n  drona_dir: /scratch/user/alice/drona_wfe\nform:\n  debounce_ms: 150\n"
        )
        .expect("write");

        let config = load_config(file.path()).expect("config");
        assert_eq!(config.dashboard.base_url(), "https://portal.example.edu/drona");
        assert_eq!(
            config.dashboard.default_run_location(),
            "/scratch/user/alice/drona_wfe/runs"
        );
        assert_eq!(
            config.dashboard.status_url(),
            "https://portal.example.edu/drona/api/config/status"
        );
        assert_eq!(config.form.debounce_ms, 150);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_env_overrides_replace_url_and_dir() {
        let mut config = ComposerConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            DASHBOARD_URL_ENV => Some("https://override.example.edu".to_string()),
            DRONA_DIR_ENV => Some("/home/bob/drona".to_string()),
            _ => None,
        });
        assert_eq!(config.dashboard.url, "https://override.example.edu");
        assert_eq!(config.dashboard.drona_dir, "/home/bob/drona");
    }

    #[test]
    fn test_blank_env_override_is_ignored() {
        let mut config = ComposerConfig::default();
        apply_env_overrides(&mut config, |_| Some("  ".to_string()));
        assert_eq!(config.dashboard.url, "http://localhost:3000");
    }
}
