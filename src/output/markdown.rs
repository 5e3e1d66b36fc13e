//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of crawl results,
//! including run information, the discovered states, the transitions between
//! them, and the actions that never produced a transition.

use crate::graph::GraphExport;
use crate::output::traits::{CrawlSummary, OutputHandler, OutputResult};
use std::path::Path;

/// File name of the markdown summary
pub const SUMMARY_FILE: &str = "summary.md";

/// Writes `summary.md`
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownSummary;

impl OutputHandler for MarkdownSummary {
    fn file_name(&self) -> &'static str {
        SUMMARY_FILE
    }

    fn render(&self, summary: &CrawlSummary) -> OutputResult<String> {
        Ok(format_markdown_summary(summary))
    }
}

/// Generates a markdown summary of a crawl run
///
/// # Arguments
///
/// * `summary` - The crawl summary data
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(summary: &CrawlSummary, output_path: &Path) -> OutputResult<()> {
    std::fs::write(output_path, format_markdown_summary(summary))?;
    Ok(())
}

/// Formats a crawl summary as markdown
///
/// # Arguments
///
/// * `summary` - The crawl summary data
///
/// # Returns
///
/// A formatted markdown string
pub fn format_markdown_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Statecrawl Crawl Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", summary.run_id));
    md.push_str(&format!("- **Target**: {}\n", summary.target_url));
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    if let Some(duration) = summary.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", summary.status));
    if let Some(termination) = &summary.termination {
        md.push_str(&format!("- **Termination**: {}\n", termination));
    }
    md.push_str(&format!("- **Config Hash**: {}\n\n", summary.config_hash));

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **States**: {}\n", summary.total_states));
    md.push_str(&format!("- **Transitions**: {}\n", summary.total_transitions));
    md.push_str(&format!("- **Deepest State**: {}\n", summary.max_depth));
    md.push_str(&format!("- **Failed Actions**: {}\n", summary.actions_failed));
    md.push_str(&format!(
        "- **Out-of-Scope Actions**: {}\n",
        summary.actions_skipped
    ));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        summary.success_rate()
    ));

    // Depth breakdown
    if !summary.depth_breakdown.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | States |\n");
        md.push_str("|-------|--------|\n");

        let mut depths: Vec<_> = summary.depth_breakdown.iter().collect();
        depths.sort_by_key(|(depth, _)| **depth);
        for (depth, count) in depths {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    md.push_str(&format_states_table(&summary.graph));
    md.push_str(&format_transitions_table(&summary.graph));

    if !summary.failures.is_empty() {
        md.push_str("## Actions Without Transition\n\n");
        md.push_str("| State | Selector | Outcome | Attempts | Error |\n");
        md.push_str("|-------|----------|---------|----------|-------|\n");
        for failure in &summary.failures {
            md.push_str(&format!(
                "| {} | `{}` | {} | {} | {} |\n",
                failure.source,
                escape_cell(&failure.selector),
                failure.outcome,
                failure.attempts,
                escape_cell(failure.error.as_deref().unwrap_or("-"))
            ));
        }
        md.push('\n');
    }

    md
}

/// Formats the states of a graph as a markdown table
pub fn format_states_table(graph: &GraphExport) -> String {
    let mut md = String::new();
    md.push_str("## States\n\n");
    if graph.states.is_empty() {
        md.push_str("No states were recorded.\n\n");
        return md;
    }

    md.push_str("| State | Depth | URL | Fingerprint | Outgoing |\n");
    md.push_str("|-------|-------|-----|-------------|----------|\n");
    for state in &graph.states {
        md.push_str(&format!(
            "| {} | {} | {} | `{}` | {} |\n",
            state.name,
            state.depth,
            escape_cell(&state.url),
            short_fingerprint(&state.fingerprint),
            graph.outgoing(state.id).count()
        ));
    }
    md.push('\n');
    md
}

/// Formats the transitions of a graph as a markdown table
pub fn format_transitions_table(graph: &GraphExport) -> String {
    let mut md = String::new();
    md.push_str("## Transitions\n\n");
    if graph.transitions.is_empty() {
        md.push_str("No transitions were recorded.\n\n");
        return md;
    }

    md.push_str("| From | To | Action | Element | Text |\n");
    md.push_str("|------|----|--------|---------|------|\n");
    for transition in &graph.transitions {
        let element = match &transition.frame {
            Some(frame) => format!("{} (frame {})", transition.selector, frame),
            None => transition.selector.clone(),
        };
        md.push_str(&format!(
            "| {} | {} | {} | `{}` | {} |\n",
            transition.from,
            transition.to,
            transition.kind,
            escape_cell(&element),
            escape_cell(&transition.text)
        ));
    }
    md.push('\n');
    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

// "dom:" + 12 hex digits is enough to tell states apart in a table
fn short_fingerprint(fingerprint: &str) -> &str {
    let end = fingerprint
        .char_indices()
        .nth(16)
        .map(|(i, _)| i)
        .unwrap_or(fingerprint.len());
    &fingerprint[..end]
}
