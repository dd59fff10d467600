//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{JobState, Severity};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Table with bold headers that wraps to the terminal width.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

pub fn state_cell(state: JobState) -> Cell {
    let color = match state {
        JobState::Done => Color::Green,
        JobState::NeedsReview => Color::Yellow,
        JobState::Failed => Color::Red,
        JobState::Uploaded | JobState::Diagnosed => Color::Blue,
        _ => Color::Cyan,
    };
    Cell::new(state.as_str()).fg(color)
}

pub fn severity_cell(severity: Severity) -> Cell {
    let color = match severity {
        Severity::Critical => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Grey,
    };
    Cell::new(severity.as_str()).fg(color)
}

pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("brochure.pdf", 20), "brochure.pdf");
        assert_eq!(truncate("quarterly-financial-report.xlsx", 12), "quarterly...");
        assert_eq!(truncate("résumé-final-v2.docx", 9), "résumé...");
    }

    #[test]
    fn test_table_renders_headers() {
        let mut t = table(&["ID", "STATE"]);
        t.add_row(vec![Cell::new("1234abcd"), state_cell(JobState::Done)]);
        let rendered = t.to_string();
        assert!(rendered.contains("STATE"));
        assert!(rendered.contains("done"));
    }
}
