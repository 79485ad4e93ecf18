//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use engine_lib::{Confidence, Figure, SourceStatus};
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a section heading with an underline
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(60));
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_currency(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Serialized name of a unit enum variant, e.g. `open_at_window_end`
pub fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Render a figure so missing and defaulted values stay distinguishable
pub fn format_figure(figure: &Figure, decimals: usize) -> String {
    match figure {
        Figure::Measured { value } => format!("{:.*}", decimals, value),
        Figure::Defaulted { value } => format!("{:.*}*", decimals, value),
        Figure::Unavailable { reason } => format!("n/a ({})", label(reason)),
    }
}

/// Color confidence level
pub fn color_confidence(confidence: Confidence) -> String {
    match confidence {
        Confidence::High => confidence.as_str().green().to_string(),
        Confidence::Medium => confidence.as_str().yellow().to_string(),
        Confidence::Low => confidence.as_str().red().to_string(),
    }
}

/// Color a status string
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "available" | "reported" | "excellent" => status.green().to_string(),
        "stale" | "discounted" | "moderate" | "limited" | "unknown" => {
            status.yellow().to_string()
        }
        "unavailable" | "suppressed" | "poor" | "excluded" => status.red().to_string(),
        _ => status.to_string(),
    }
}

pub fn color_source_status(status: SourceStatus) -> String {
    color_status(status.as_str())
}
