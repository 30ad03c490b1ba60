//! Output emitter: compiled graphs to template documents.

use serde_json::Value;

use fargate_core::{CompileResult, ResourceGraph};

/// Render `graph` as a template document.
///
/// With a `base` document the graph is merged into it (host merge);
/// otherwise a fresh `{"Resources", "Outputs"}` document is produced.
pub fn render(graph: &ResourceGraph, base: Option<Value>) -> CompileResult<Value> {
    match base {
        Some(mut template) => {
            graph.merge_into_template(&mut template)?;
            Ok(template)
        }
        None => Ok(graph.to_template()),
    }
}

pub fn to_json_string(template: &Value, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(template)
    } else {
        serde_json::to_string(template)
    }
}
