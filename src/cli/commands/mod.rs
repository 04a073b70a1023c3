//! Subcommands module for armctl CLI
//!
//! This module contains all the subcommand implementations.

pub mod apply;
pub mod inspect;

use crate::cli::output::OutputFormatter;
use crate::cli::{Cli, ResourceArgs};
use anyhow::{bail, Context, Result};
use armctl::config::Config;
use armctl::modules::{ModuleContext, ModuleParams};
use armctl::reconcile::RequestedState;
use armctl::registry::Registry;
use serde_json::Value;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Check mode (dry-run)
    pub check_mode: bool,
    /// Diff mode
    pub diff_mode: bool,
    /// Subscription from the command line or configuration
    pub subscription_id: Option<String>,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
    /// Resource types: built-in, then configured manifests, then `--manifest`s
    pub registry: Registry,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, config: Config, cancel: CancellationToken) -> Result<Self> {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
        let registry = load_registry(&config, &cli.manifests)?;
        let subscription_id = cli
            .subscription
            .clone()
            .or_else(|| config.arm.subscription_id.clone());

        Ok(Self {
            config,
            output,
            check_mode: cli.check_mode,
            diff_mode: cli.diff_mode,
            subscription_id,
            cancel,
            registry,
        })
    }

    /// Context handed to modules
    pub fn module_context(&self, check_mode: bool) -> ModuleContext {
        ModuleContext::new()
            .with_check_mode(check_mode)
            .with_diff_mode(self.diff_mode)
            .with_subscription(self.subscription_id.clone())
            .with_cancel(self.cancel.clone())
    }
}

/// Built-in resource types merged with every extra manifest, in order.
pub fn load_registry(config: &Config, extra: &[std::path::PathBuf]) -> Result<Registry> {
    let mut registry = Registry::builtin()?;
    for path in config.manifests.paths.iter().chain(extra) {
        tracing::debug!("Loading manifest {}", path.display());
        registry.merge(Registry::load(path)?);
    }
    Ok(registry)
}

/// Collect module parameters from `--args` and `-a key=value`, in that order,
/// then apply `--state`.
pub fn collect_params(args: &ResourceArgs) -> Result<ModuleParams> {
    let mut params = match &args.args_file {
        Some(path) => read_args_file(path)?,
        None => ModuleParams::new(),
    };

    for pair in &args.args {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("argument '{}' is not in key=value form", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("argument '{}' has an empty key", pair);
        }
        params.insert(key.to_string(), parse_scalar(raw));
    }

    if let Some(state) = args.state {
        params.insert("state".to_string(), Value::String(state.to_string()));
    }
    Ok(params)
}

/// Requested state from collected parameters, for display purposes.
pub fn requested_state(params: &ModuleParams) -> RequestedState {
    armctl::modules::requested_state(params).unwrap_or_default()
}

fn read_args_file(path: &Path) -> Result<ModuleParams> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read arguments file: {}", path.display()))?;
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse arguments file: {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse arguments file: {}", path.display()))?,
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ModuleParams::new()),
        _ => bail!("arguments file {} must contain a mapping", path.display()),
    }
}

/// `-a` values are YAML, so `priority=100` is a number and `tags={env: prod}`
/// a mapping. Anything YAML rejects is taken as a plain string.
fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
