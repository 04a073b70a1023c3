//! Configuration for armctl
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/armctl/armctl.toml)
//! - User configuration (~/.armctl.toml)
//! - Project configuration (./armctl.toml)
//! - An explicit `--config` file, which replaces the three above
//! - Environment variables
//!
//! Files are merged key by key, so a project file only needs the settings it
//! changes.

use crate::client::PollPolicy;
use crate::retry::RetryPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public Azure cloud ARM endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com/";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ARM endpoint and credentials
    pub arm: ArmConfig,

    /// Long-running operation polling
    pub polling: PollPolicy,

    /// Transport retries
    pub retry: RetryPolicy,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Extra resource-type manifests
    pub manifests: ManifestsConfig,
}

/// ARM connection settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// Control-plane endpoint
    pub endpoint: String,

    /// Subscription used in resource ids
    pub subscription_id: Option<String>,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Timeout for a single HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_id: None,
            token: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for ArmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmConfig")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format '{}', expected 'text' or 'json'", other),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when neither `-v` nor `RUST_LOG` is given
    pub level: Option<String>,

    /// Log format
    pub format: LogFormat,
}

/// Extra manifest files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestsConfig {
    /// Manifests loaded after the built-in resource types
    pub paths: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
        }
        let paths = Self::get_config_paths(config_path);
        let mut config = Self::load_from(&paths)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Merge the given files, in order, over the defaults. Missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        for path in paths.iter().filter(|p| p.exists()) {
            tracing::debug!("Loading config from {}", path.display());
            let layer = Self::read_layer(path)?;
            deep_merge(&mut merged, layer);
        }
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        let mut paths = vec![PathBuf::from("/etc/armctl/armctl.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".armctl.toml"));
        }
        paths.push(PathBuf::from("armctl.toml"));
        paths
    }

    /// Parse one config file into a generic tree
    fn read_layer(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let layer: Value = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        if !layer.is_object() {
            bail!("config file {} must contain a table", path.display());
        }
        Ok(layer)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("ARMCTL_ENDPOINT") {
            self.arm.endpoint = endpoint;
        }

        if let Ok(subscription) = std::env::var("ARMCTL_SUBSCRIPTION_ID") {
            self.arm.subscription_id = Some(subscription);
        }

        if let Ok(token) = std::env::var("ARMCTL_TOKEN") {
            self.arm.token = Some(token);
        }

        if let Ok(timeout) = std::env::var("ARMCTL_POLL_TIMEOUT") {
            self.polling.timeout = parse_duration(&timeout)
                .with_context(|| format!("Invalid ARMCTL_POLL_TIMEOUT '{}'", timeout))?;
        }

        if let Ok(format) = std::env::var("ARMCTL_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    /// Load from a specific file, ignoring the standard locations
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let layer = Self::read_layer(path)?;
        let mut merged = serde_json::to_value(Config::default())?;
        deep_merge(&mut merged, layer);
        serde_json::from_value(merged)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

/// Parse a human-readable duration such as `90s` or `15m`.
fn parse_duration(raw: &str) -> Result<Duration> {
    let parsed: humantime_serde::Serde<Duration> =
        serde_json::from_value(Value::String(raw.trim().to_string()))?;
    Ok(parsed.into_inner())
}

/// Recursively overlay `layer` onto `base`; tables merge, everything else replaces.
fn deep_merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
