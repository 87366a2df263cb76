//! Text rendering helpers for `--format text`.

use colored::{ColoredString, Colorize};

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Status word colored by how settled it is.
pub fn status_badge(status: &str) -> ColoredString {
    match status {
        "synced" | "completed" | "ok" => status.bright_green(),
        "failed" | "deadline_exceeded" => status.bright_red(),
        "dispatched" | "awaiting_result" | "active" | "pending" => status.bright_yellow(),
        _ => status.normal(),
    }
}

pub fn row(id: &str, status: &str, label: &str) -> String {
    format!(
        "  {} {} {} {}",
        "▸".bright_cyan(),
        id.bright_white(),
        status_badge(status),
        compact_line(label, 72)
    )
}
