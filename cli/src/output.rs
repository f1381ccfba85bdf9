//! Output formatting utilities for CLI commands

use colored::Colorize;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a `key: value` line with the key dimmed
pub fn field(key: &str, value: impl std::fmt::Display) {
    println!("  {:<24} {}", format!("{}:", key).dimmed(), value);
}

/// Print a section heading
pub fn heading(title: &str) {
    println!("{}", title.bold());
}
