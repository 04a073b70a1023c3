//! armctl - declarative Azure Resource Manager reconciliation
//!
//! This is the main entry point for the armctl CLI.

mod cli;

use anyhow::Result;
use armctl::config::{Config, LogFormat, LoggingConfig};
use armctl::error::ErrorCategory;
use cli::commands::{self, CommandContext};
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(err) => report_error(&cli, &err),
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging based on verbosity
    init_logging(cli.verbosity(), &config.logging);

    if cli.verbosity() >= 2 {
        eprintln!("armctl v{}", VERSION);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight operations");
            on_interrupt.cancel();
        }
    });

    let ctx = CommandContext::new(cli, config, cancel)?;

    // Execute the appropriate command
    match &cli.command {
        Commands::Apply(args) => commands::apply::execute(&ctx, args, false).await,
        Commands::Plan(args) => commands::apply::execute(&ctx, args, true).await,
        Commands::Types => commands::inspect::types(&ctx),
        Commands::Schema(args) => commands::inspect::schema(&ctx, args),
        Commands::Validate(args) => commands::inspect::validate(&ctx, args),
    }
}

/// Print `err` and return its exit code. Errors that did not come from the
/// library (configuration, argument files) count as validation failures.
fn report_error(cli: &Cli, err: &anyhow::Error) -> i32 {
    let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
    match err.downcast_ref::<armctl::Error>() {
        Some(error) => {
            output.error(&error.to_string(), &error.to_json());
            error.exit_code()
        }
        None => {
            let message = format!("{:#}", err);
            let category = ErrorCategory::ValidationFailed;
            output.error(
                &message,
                &serde_json::json!({
                    "failed": true,
                    "category": category,
                    "msg": message,
                }),
            );
            category.exit_code()
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
