//! Process setup: tracing and composer construction from a config file.

use std::fs::{create_dir_all, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;

use drona_client::{ClientError, DashboardClient};
use drona_config::{load_config_with_env, ComposerConfig, ConfigError, ObservabilityConfig};

use crate::composer::{Composer, LogNotifier, Notifier};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Install the global subscriber once. `RUST_LOG` wins over the configured
/// level; `DRONA_LOG_FILE` wins over the configured log file.
pub fn init_tracing(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file = std::env::var("DRONA_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| observability.log_file.clone());
        let fallback_level = match observability.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        match log_file.as_deref().and_then(open_log_file) {
            Some(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }

        tracing::info!(
            log_level = %observability.log_level,
            log_file = log_file.as_deref().unwrap_or("(stderr)"),
            "tracing initialized"
        );
    });
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = create_dir_all(parent) {
            eprintln!("failed to create log directory '{}': {}", parent.display(), err);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("failed to open log file '{}': {}", path.display(), err);
            None
        }
    }
}

/// Loaded configuration plus the HTTP client built from it.
pub struct ComposerBootstrap {
    pub config: Arc<ComposerConfig>,
    pub client: DashboardClient,
}

impl ComposerBootstrap {
    pub fn from_config(config: ComposerConfig) -> Result<Self, BootstrapError> {
        init_tracing(&config.observability);
        let client = DashboardClient::from_config(&config.dashboard)?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    /// Load `path` (defaults when absent) with environment overrides applied.
    pub fn from_path(path: Option<&Path>) -> Result<Self, BootstrapError> {
        let config = load_config_with_env(path)?;
        Self::from_config(config)
    }

    pub fn composer(&self) -> Composer {
        self.composer_with(Arc::new(LogNotifier))
    }

    pub fn composer_with(&self, notifier: Arc<dyn Notifier>) -> Composer {
        Composer::new(self.config.clone(), self.client.clone(), notifier)
    }
}
