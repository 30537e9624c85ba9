//! Builtin nodes: the in-process units of work flows and the chat
//! planner can dispatch.
//!
//! Every node polls the session abort signal at its suspension points
//! and returns `aborted` instead of fighting cancellation. Heavy
//! lifting (reasoning, parsing, retrieval) happens in the external
//! services behind `ms-clients`; nodes orchestrate and shape results.

mod data_query;
mod doc_writer;
mod file_parser;
mod search;

pub use data_query::DataQueryNode;
pub use doc_writer::DocWriterNode;
pub use file_parser::FileParserNode;
pub use search::SearchNode;

use std::sync::Arc;

use ms_clients::{DataService, LlmClient};
use ms_kernel::{BuiltinNode, NodeRegistry};

/// Register the standard node set. Called once at startup; the builtin
/// table is immutable afterwards.
pub fn register_builtins(
    registry: &NodeRegistry,
    llm: Arc<dyn LlmClient>,
    data: Arc<dyn DataService>,
) {
    registry.register_builtin(Arc::new(SearchNode::new(llm.clone())));
    registry.register_builtin(Arc::new(DocWriterNode::new(llm)));
    registry.register_builtin(Arc::new(DataQueryNode::new(data.clone())));
    registry.register_builtin(Arc::new(FileParserNode::new(data)));
}
