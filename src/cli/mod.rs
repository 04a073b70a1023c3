//! CLI module for armctl
//!
//! Argument parsing and subcommand dispatch for the `armctl` binary.

pub mod commands;
pub mod output;

use armctl::reconcile::RequestedState;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// armctl - declarative Azure Resource Manager reconciliation
///
/// Brings one ARM resource to the state described by its arguments: creates
/// it, updates the fields that differ, deletes it, or leaves it alone.
#[derive(Parser, Debug, Clone)]
#[command(name = "armctl")]
#[command(author = "Armctl Contributors")]
#[command(version)]
#[command(about = "Declarative Azure Resource Manager reconciliation", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decide what would change without changing anything
    #[arg(long = "check", global = true)]
    pub check_mode: bool,

    /// Show a before/after diff of changed resources
    #[arg(long = "diff", global = true)]
    pub diff_mode: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "ARMCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subscription used in resource ids (overrides configuration)
    #[arg(short = 's', long, global = true)]
    pub subscription: Option<String>,

    /// Additional resource-type manifest (repeatable)
    #[arg(short = 'm', long = "manifest", global = true, action = clap::ArgAction::Append)]
    pub manifests: Vec<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Reconcile a resource to the requested state
    Apply(ResourceArgs),

    /// Show what `apply` would do, without changing anything
    Plan(ResourceArgs),

    /// List the registered resource types
    Types,

    /// Show the argument schema of a resource type
    Schema(SchemaArgs),

    /// Check arguments against a resource type's schema without contacting Azure
    Validate(ResourceArgs),
}

/// Arguments shared by `apply`, `plan` and `validate`
#[derive(Parser, Debug, Clone)]
pub struct ResourceArgs {
    /// Resource type, e.g. `resource_group` or `azure_rm_resource_group`
    pub resource_type: String,

    /// YAML or JSON file with the resource arguments
    #[arg(long = "args", value_name = "FILE")]
    pub args_file: Option<PathBuf>,

    /// Single argument as key=value; the value is parsed as YAML (repeatable)
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub args: Vec<String>,

    /// Requested state; overrides a `state` given in the arguments
    #[arg(long, value_parser = parse_state)]
    pub state: Option<RequestedState>,
}

/// Arguments for the schema command
#[derive(Parser, Debug, Clone)]
pub struct SchemaArgs {
    /// Resource type
    pub resource_type: String,
}

fn parse_state(raw: &str) -> Result<RequestedState, String> {
    raw.parse().map_err(|e: armctl::Error| e.to_string())
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
