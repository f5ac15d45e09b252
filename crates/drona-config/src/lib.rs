//! # Drona Config
//!
//! Single-file configuration for the composer engine.
//! One `drona.yaml` describes the dashboard endpoints, form timing and
//! observability settings. The configuration is loaded once at startup and
//! shared read-only (`Arc<ComposerConfig>`) with every component.

mod loader;

pub use loader::{load_config, load_config_with_env, ConfigError};

use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposerConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub form: FormConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            dashboard: DashboardConfig::default(),
            form: FormConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ComposerConfig {
    pub fn dashboard(&self) -> &DashboardConfig {
        &self.dashboard
    }

    pub fn form(&self) -> &FormConfig {
        &self.form
    }
}

/// Where the dashboard backend lives and how to reach it.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Base URL, e.g. `https://portal.hprc.tamu.edu/pun/sys/drona`.
    #[serde(default = "default_dashboard_url")]
    pub url: String,
    /// User's Drona working directory; runs default to `{drona_dir}/runs`.
    #[serde(default)]
    pub drona_dir: String,
    /// Configuration status endpoint. Defaults to `{url}/api/config/status`.
    #[serde(default)]
    pub config_status_url: Option<String>,
    /// Configuration save endpoint. Defaults to `{url}/api/config/save`.
    #[serde(default)]
    pub config_save_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: default_dashboard_url(),
            drona_dir: String::new(),
            config_status_url: None,
            config_save_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DashboardConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn status_url(&self) -> String {
        self.config_status_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/config/status", self.base_url()))
    }

    pub fn save_url(&self) -> String {
        self.config_save_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/config/save", self.base_url()))
    }

    /// Default run location for new jobs.
    pub fn default_run_location(&self) -> String {
        format!("{}/runs", self.drona_dir.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_dashboard_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Form engine timing and presentation knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct FormConfig {
    /// Debounce window applied to dependency-triggered refetches.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Minimum query length before autocomplete fields search.
    #[serde(default = "default_autocomplete_min_chars")]
    pub autocomplete_min_chars: usize,
    #[serde(default = "default_true")]
    pub label_on_top: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            autocomplete_min_chars: default_autocomplete_min_chars(),
            label_on_top: true,
        }
    }
}

impl FormConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_autocomplete_min_chars() -> usize {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
