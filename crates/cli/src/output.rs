//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a utilization reading
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color a utilization reading by the detector's bands
pub fn color_percent(value: f64) -> String {
    let formatted = format_percent(value);
    if value >= 95.0 {
        formatted.red().bold().to_string()
    } else if value >= 85.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Render an RFC 3339 timestamp for humans, passing through anything else
pub fn format_timestamp(ts: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(ts) {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.to_string()
    }
}

/// Color a mode or state word
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "armed" | "isolated" => status.red().bold().to_string(),
        "dry-run" | "rate limited" => status.yellow().to_string(),
        "enabled" | "ok" | "local" => status.green().to_string(),
        "disabled" | "monitor" => status.blue().to_string(),
        _ => status.to_string(),
    }
}
