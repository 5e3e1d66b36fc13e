//! Crawl overview report
//!
//! Writes `overview.md` at the end of a run and, with screenshots enabled,
//! `screenshots/<state>.png` as states are discovered.

use super::CrawlPlugin;
use crate::crawler::RunOutcome;
use crate::graph::{GraphExport, GraphView, StateVertex};
use crate::output::{format_states_table, format_transitions_table, OutputResult};
use std::path::{Path, PathBuf};

/// File name of the overview report
pub const OVERVIEW_FILE: &str = "overview.md";

const SCREENSHOT_DIR: &str = "screenshots";

pub struct CrawlOverview {
    directory: PathBuf,
    screenshots: bool,
}

impl CrawlOverview {
    pub fn new(directory: &Path, screenshots: bool) -> Self {
        Self {
            directory: directory.to_path_buf(),
            screenshots,
        }
    }

    fn screenshot_path(&self, name: &str) -> PathBuf {
        self.directory.join(SCREENSHOT_DIR).join(format!("{}.png", name))
    }

    fn render(&self, graph: &dyn GraphView, outcome: &RunOutcome) -> String {
        let export = GraphExport::from_view(graph);
        let mut md = String::new();

        md.push_str("# Crawl Overview\n\n");
        md.push_str(&format!("- **Run ID**: {}\n", outcome.run_id));
        md.push_str(&format!("- **Status**: {}\n", outcome.status.to_db_string()));
        md.push_str(&format!("- **Termination**: {}\n", outcome.termination));
        md.push_str(&format!(
            "- **Elapsed**: {:.1} seconds\n",
            outcome.elapsed.as_secs_f64()
        ));
        md.push_str(&format!(
            "- **States / Transitions / Failed Actions**: {} / {} / {}\n\n",
            outcome.states, outcome.edges, outcome.failed_actions
        ));

        md.push_str(&format_states_table(&export));
        md.push_str(&format_transitions_table(&export));

        if self.screenshots {
            md.push_str("## Screenshots\n\n");
            for state in &export.states {
                if self.screenshot_path(&state.name).exists() {
                    md.push_str(&format!(
                        "### {}\n\n![{}]({}/{}.png)\n\n",
                        state.name, state.name, SCREENSHOT_DIR, state.name
                    ));
                }
            }
        }

        md
    }
}

impl CrawlPlugin for CrawlOverview {
    fn name(&self) -> &str {
        "crawl-overview"
    }

    fn on_state_discovered(&self, _graph: &dyn GraphView, state: &StateVertex) -> OutputResult<()> {
        if !self.screenshots {
            return Ok(());
        }
        let Some(png) = &state.screenshot else {
            return Ok(());
        };

        let path = self.screenshot_path(&state.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, png)?;
        tracing::trace!("Saved screenshot of {} to {}", state.name, path.display());
        Ok(())
    }

    fn on_run_terminated(&self, graph: &dyn GraphView, outcome: &RunOutcome) -> OutputResult<()> {
        let path = self.directory.join(OVERVIEW_FILE);
        std::fs::write(&path, self.render(graph, outcome))?;
        tracing::info!("Crawl overview written to {}", path.display());
        Ok(())
    }
}
