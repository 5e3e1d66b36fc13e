//! JSON export of the state graph

use crate::graph::GraphExport;
use crate::output::traits::{CrawlSummary, OutputHandler, OutputResult};
use serde::Serialize;

/// File name of the JSON export
pub const GRAPH_FILE: &str = "state-graph.json";

#[derive(Serialize)]
struct GraphDocument<'a> {
    run_id: i64,
    target_url: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    termination: Option<&'a str>,
    #[serde(flatten)]
    graph: &'a GraphExport,
}

/// Writes `state-graph.json`: run metadata plus every state and transition
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonGraph;

impl OutputHandler for JsonGraph {
    fn file_name(&self) -> &'static str {
        GRAPH_FILE
    }

    fn render(&self, summary: &CrawlSummary) -> OutputResult<String> {
        let document = GraphDocument {
            run_id: summary.run_id,
            target_url: &summary.target_url,
            status: &summary.status,
            termination: summary.termination.as_deref(),
            graph: &summary.graph,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
