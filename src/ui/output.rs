//! Output helpers for consistent CLI formatting

use super::context::UiContext;
use console::{style, Style};

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}

/// How full the cache is relative to its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    /// Under 80%
    Ok,
    /// 80% up to the budget
    High,
    /// At or over the budget
    Full,
}

impl UsageLevel {
    pub fn from_usage(used: u64, budget: u64) -> Self {
        let percent = Self::percentage(used, budget);
        if percent >= 100.0 {
            Self::Full
        } else if percent >= 80.0 {
            Self::High
        } else {
            Self::Ok
        }
    }

    pub fn percentage(used: u64, budget: u64) -> f64 {
        if budget == 0 {
            return 0.0;
        }
        used as f64 / budget as f64 * 100.0
    }
}

/// Bold section header
pub fn section(_ctx: &UiContext, title: &str) {
    println!();
    println!("{}", style(title).bold());
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    let mark = if ctx.use_fancy_output() { "✓" } else { "[OK]" };
    println!("  {} {}", style(mark).green(), message);
}

pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    let mark = if ctx.use_fancy_output() { "✓" } else { "[OK]" };
    println!("  {} {} ({})", style(mark).green(), message, style(detail).dim());
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    let mark = if ctx.use_fancy_output() { "!" } else { "[WARN]" };
    println!("  {} {}", style(mark).yellow(), message);
}

/// Warning followed by a dimmed hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    let mark = if ctx.use_fancy_output() { "!" } else { "[WARN]" };
    println!("  {} {} - {}", style(mark).yellow(), message, style(hint).dim());
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    let mark = if ctx.use_fancy_output() { "✗" } else { "[FAIL]" };
    println!("  {} {}: {}", style(mark).red(), message, style(detail).red());
}

pub fn step_info(ctx: &UiContext, message: &str) {
    let mark = if ctx.use_fancy_output() { "•" } else { "[INFO]" };
    println!("  {} {}", style(mark).cyan(), message);
}

pub fn remark(_ctx: &UiContext, message: &str) {
    println!("  {}", style(message).dim());
}

pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {key}: {value}");
    }
}

/// Key-value pair colored by whether the value is healthy
pub fn key_value_status(ctx: &UiContext, key: &str, value: &str, ok: bool) {
    if ctx.use_fancy_output() {
        let value_style = if ok {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        println!("  {}: {}", style(key).dim(), value_style.apply_to(value));
    } else {
        let prefix = if ok { "[OK]" } else { "[WARN]" };
        println!("  {prefix} {key}: {value}");
    }
}
