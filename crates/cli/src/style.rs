//! Shared styling utilities for the CLI.

use std::borrow::Cow;
use std::time::Duration;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use consolesync_core::archive::ProtectedAction;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Host name in listings and prompts (cyan).
pub fn host(name: &str) -> String {
    Style::new().cyan().apply_to(name).to_string()
}

/// One-word description of what happened to a protected directory.
pub fn protected_action(action: &ProtectedAction) -> String {
    match action {
        ProtectedAction::TakenFromTarget { files } => Style::new()
            .blue()
            .apply_to(format!("taken from target ({} files)", files))
            .to_string(),
        ProtectedAction::Removed => Style::new().yellow().apply_to("removed").to_string(),
        ProtectedAction::Absent => dim("absent"),
    }
}

/// Braille spinner with a message, ticking until cleared.
pub fn spinner(msg: impl Into<Cow<'static, str>>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(msg);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Empty table with the standard preset and the given header row.
pub fn table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(columns.to_vec());
    table
}
