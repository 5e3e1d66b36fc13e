//! Plugin hooks
//!
//! Plugins observe a crawl at three points: when a state is discovered, when
//! a transition is recorded, and when the run ends. Each hook receives a
//! read-only view of the graph; plugins cannot change the crawl.
//!
//! A failing hook is logged and the crawl goes on.

mod overview;

pub use overview::CrawlOverview;

use crate::config::Config;
use crate::crawler::RunOutcome;
use crate::graph::{GraphView, StateVertex, Transition};
use crate::output::OutputResult;
use std::path::Path;

/// Observer of crawl lifecycle events
///
/// Hooks are called from the crawl workers, possibly from several at once.
pub trait CrawlPlugin: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Called once for every new state, right after it joined the graph
    fn on_state_discovered(&self, _graph: &dyn GraphView, _state: &StateVertex) -> OutputResult<()> {
        Ok(())
    }

    /// Called once for every recorded transition
    fn on_edge_added(&self, _graph: &dyn GraphView, _transition: &Transition) -> OutputResult<()> {
        Ok(())
    }

    /// Called after the workers stopped and the graph is final
    fn on_run_terminated(&self, _graph: &dyn GraphView, _outcome: &RunOutcome) -> OutputResult<()> {
        Ok(())
    }
}

/// Ordered list of plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn CrawlPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry of the built-in plugins enabled in `config`
    ///
    /// # Arguments
    ///
    /// * `config` - The frozen configuration
    /// * `output_dir` - Where plugins write their files
    pub fn from_config(config: &Config, output_dir: &Path) -> Self {
        let mut registry = Self::new();
        if config.plugins.crawl_overview {
            registry.register(CrawlOverview::new(output_dir, config.output.screenshots));
        }
        registry
    }

    /// Appends a plugin; hooks run in registration order
    pub fn register(&mut self, plugin: impl CrawlPlugin + 'static) {
        tracing::debug!("Registered plugin {}", plugin.name());
        self.plugins.push(Box::new(plugin));
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn state_discovered(&self, graph: &dyn GraphView, state: &StateVertex) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_state_discovered(graph, state) {
                tracing::warn!("Plugin {} failed on state {}: {}", plugin.name(), state.id, e);
            }
        }
    }

    pub fn edge_added(&self, graph: &dyn GraphView, transition: &Transition) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_edge_added(graph, transition) {
                tracing::warn!(
                    "Plugin {} failed on edge {} -> {}: {}",
                    plugin.name(),
                    transition.from,
                    transition.to,
                    e
                );
            }
        }
    }

    pub fn run_terminated(&self, graph: &dyn GraphView, outcome: &RunOutcome) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_run_terminated(graph, outcome) {
                tracing::warn!("Plugin {} failed at end of run: {}", plugin.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}
