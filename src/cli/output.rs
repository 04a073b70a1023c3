//! Output formatting for armctl
//!
//! Colored human-readable output, JSON output for scripting, and a spinner
//! while remote calls are in flight.

use armctl::modules::{Diff, ModuleOutput, ModuleStatus};
use armctl::registry::ResourceType;
use armctl::reconcile::ArgumentSchema;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR and plain pipes
        let use_color = use_color
            && std::env::var("NO_COLOR").is_err()
            && std::io::stdout().is_terminal();

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let stars = "*".repeat(80_usize.saturating_sub(title.len() + 1));
        if self.use_color {
            println!("\n{} {}", title.bright_white().bold(), stars.bright_black());
        } else {
            println!("\n{} {}", title, stars);
        }
    }

    /// Print the result of one module run
    pub fn module_result(&self, module: &str, output: &ModuleOutput) {
        if self.json_mode {
            let mut result = serde_json::json!({
                "module": module,
                "changed": output.changed,
                "status": output.status,
                "msg": output.msg,
            });
            for (key, value) in &output.data {
                result[key] = value.clone();
            }
            if let Some(diff) = &output.diff {
                result["diff"] = serde_json::to_value(diff).unwrap_or(Value::Null);
            }
            self.print_json(&result);
            return;
        }

        let status = match (output.status, self.use_color) {
            (ModuleStatus::Ok, true) => "ok".green().to_string(),
            (ModuleStatus::Changed, true) => "changed".yellow().to_string(),
            (status, false) => status.to_string(),
        };
        println!("{}: [{}] => {}", status, module, output.msg);

        if let Some(Value::Array(warnings)) = output.data.get("warnings") {
            for warning in warnings {
                let path = warning.get("path").and_then(Value::as_str).unwrap_or("?");
                self.warning(&format!(
                    "{} differs but cannot be updated; recreate the resource to change it",
                    path
                ));
            }
        }

        if self.verbosity >= 1 {
            if let Some(Value::Array(changes)) = output.data.get("changes") {
                for change in changes {
                    let path = change.get("path").and_then(Value::as_str).unwrap_or("?");
                    let observed = change.get("observed").cloned().unwrap_or(Value::Null);
                    let desired = change.get("desired").cloned().unwrap_or(Value::Null);
                    println!("    {}: {} -> {}", path, observed, desired);
                }
            }
        }

        if let Some(diff) = &output.diff {
            self.diff(diff);
        }
    }

    /// Print a unified diff produced by a module
    pub fn diff(&self, diff: &Diff) {
        if self.json_mode {
            return;
        }

        let header = format!("--- before ({})\n+++ after ({})", diff.before, diff.after);
        if self.use_color {
            println!("{}", header.bold());
        } else {
            println!("{}", header);
        }

        let Some(details) = &diff.details else {
            return;
        };
        for line in details.lines() {
            if !self.use_color {
                println!("{}", line);
            } else if line.starts_with('+') {
                println!("{}", line.green());
            } else if line.starts_with('-') {
                println!("{}", line.red());
            } else {
                println!("{}", line);
            }
        }
    }

    /// Print the registered resource types
    pub fn resource_types<'a>(&self, types: impl Iterator<Item = &'a ResourceType>) {
        if self.json_mode {
            let listing: Vec<Value> = types
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "module": t.module_name(),
                        "type": t.qualified_type(),
                        "api_version": t.api_version,
                        "description": t.description,
                    })
                })
                .collect();
            self.print_json(&Value::Array(listing));
            return;
        }

        for t in types {
            let name = if self.use_color {
                t.module_name().bright_white().bold().to_string()
            } else {
                t.module_name()
            };
            println!(
                "{:<40} {} ({})",
                name,
                t.qualified_type(),
                t.api_version
            );
            if let Some(description) = &t.description {
                println!("    {}", description);
            }
        }
    }

    /// Print the argument schema of a resource type
    pub fn schema(&self, resource_type: &ResourceType) {
        if self.json_mode {
            self.print_json(&serde_json::to_value(resource_type).unwrap_or(Value::Null));
            return;
        }

        self.section(&format!(
            "{} [{}]",
            resource_type.module_name(),
            resource_type.qualified_type()
        ));
        println!("id: {}", resource_type.id_template);
        println!("api-version: {}", resource_type.api_version);
        println!(
            "updates: {}",
            if resource_type.supports_patch { "PATCH" } else { "PUT" }
        );
        println!();
        self.arguments(&resource_type.arguments, 0);
    }

    fn arguments(&self, schema: &ArgumentSchema, depth: usize) {
        let indent = "  ".repeat(depth);
        for (name, spec) in schema.iter() {
            let mut flags = Vec::new();
            if spec.required {
                flags.push("required".to_string());
            }
            if let Some(disposition) = &spec.disposition {
                flags.push(format!("at {}", disposition));
            }
            if !spec.updatable {
                flags.push("create only".to_string());
            }
            if spec.read_only {
                flags.push("read only".to_string());
            }
            if spec.no_log {
                flags.push("no_log".to_string());
            }

            let name = if self.use_color && spec.required {
                name.bold().to_string()
            } else {
                name.clone()
            };
            println!("{}{}: {} [{}]", indent, name, spec.arg_type, flags.join(", "));
            if let Some(choices) = &spec.choices {
                println!("{}    choices: {}", indent, Value::Array(choices.clone()));
            }
            if let Some(options) = &spec.options {
                self.arguments(options, depth + 1);
            }
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.json_mode {
            return;
        }
        if self.use_color {
            println!("{} {}", "INFO".blue().bold(), message);
        } else {
            println!("INFO {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            return;
        }
        if self.use_color {
            eprintln!("{} {}", "WARNING".yellow().bold(), message);
        } else {
            eprintln!("WARNING {}", message);
        }
    }

    /// Print an error as text, or as the structured error object in JSON mode
    pub fn error(&self, message: &str, structured: &Value) {
        if self.json_mode {
            self.print_json(structured);
            return;
        }
        if self.use_color {
            eprintln!("{} {}", "ERROR".red().bold(), message);
        } else {
            eprintln!("ERROR {}", message);
        }
    }

    /// Print debug message (only if verbosity >= 2)
    pub fn debug(&self, message: &str) {
        if self.verbosity < 2 || self.json_mode {
            return;
        }
        if self.use_color {
            eprintln!("{} {}", "DEBUG".bright_black(), message.bright_black());
        } else {
            eprintln!("DEBUG {}", message);
        }
    }

    /// Spinner shown while a remote call is running; hidden in JSON mode
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if self.json_mode {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Elapsed time since the formatter was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn print_json(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("failed to serialize output: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_spinner_in_json_mode() {
        let output = OutputFormatter::new(false, true, 0);
        assert!(output.spinner("working").is_hidden());
    }

    #[test]
    fn test_color_disabled_by_flag() {
        let output = OutputFormatter::new(false, false, 0);
        assert!(!output.use_color);
        assert!(!output.is_json());
    }
}
