//! Sub-servers composing backend operations into MCP tool surfaces.

mod chains;
mod graph_memory;
mod model;
mod notebook;
mod tasks;

pub use chains::{ChainServer, ChainService, ChainStatus, ReasoningChain, ReasoningStep, StepType};
pub use graph_memory::GraphMemoryServer;
pub use model::ModelServer;
pub use notebook::NotebookServer;
pub use tasks::{DependencyType, TaskPriority, TaskServer, TaskService, TaskStatus};

use serde_json::{Map, Value};

use crate::error::{McpError, McpResult};

/// Required string argument.
pub(crate) fn arg_str(args: &Value, tool: &str, key: &str) -> McpResult<String> {
    match args.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(McpError::InvalidParameters {
            tool_name: tool.to_string(),
            message: format!("{} must be a non-empty string", key),
        }),
    }
}

/// Optional string argument.
pub(crate) fn arg_opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Optional unsigned integer with a default.
pub(crate) fn arg_u64_or(args: &Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(Value::as_u64).unwrap_or(default)
}

/// Optional float argument.
pub(crate) fn arg_opt_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

/// Optional bool with a default.
pub(crate) fn arg_bool_or(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Optional object argument, cloned out.
pub(crate) fn arg_opt_object(args: &Value, tool: &str, key: &str) -> McpResult<Option<Map<String, Value>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(McpError::InvalidParameters {
            tool_name: tool.to_string(),
            message: format!("{} must be an object", key),
        }),
    }
}

/// Optional list of strings.
pub(crate) fn arg_opt_str_list(args: &Value, tool: &str, key: &str) -> McpResult<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        return Err(McpError::InvalidParameters {
                            tool_name: tool.to_string(),
                            message: format!("{} must be a list of strings", key),
                        })
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(McpError::InvalidParameters {
            tool_name: tool.to_string(),
            message: format!("{} must be a list of strings", key),
        }),
    }
}

/// Parse an enum-ish argument via FromStr, surfacing the parse error.
pub(crate) fn arg_parsed<T>(args: &Value, tool: &str, key: &str) -> McpResult<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match arg_opt_str(args, key) {
        None => Ok(None),
        Some(text) => text.parse().map(Some).map_err(|e| McpError::InvalidParameters {
            tool_name: tool.to_string(),
            message: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arg_str() {
        let args = json!({"label": "Person", "blank": "  "});
        assert_eq!(arg_str(&args, "t", "label").unwrap(), "Person");
        assert!(arg_str(&args, "t", "blank").is_err());
        assert!(arg_str(&args, "t", "missing").is_err());
    }

    #[test]
    fn test_arg_defaults() {
        let args = json!({"limit": 5, "flag": false});
        assert_eq!(arg_u64_or(&args, "limit", 10), 5);
        assert_eq!(arg_u64_or(&args, "missing", 10), 10);
        assert!(!arg_bool_or(&args, "flag", true));
        assert!(arg_bool_or(&args, "missing", true));
    }

    #[test]
    fn test_arg_opt_object() {
        let args = json!({"properties": {"name": "Alice"}, "bad": 3});
        assert!(arg_opt_object(&args, "t", "properties").unwrap().is_some());
        assert!(arg_opt_object(&args, "t", "missing").unwrap().is_none());
        assert!(arg_opt_object(&args, "t", "bad").is_err());
    }

    #[test]
    fn test_arg_opt_str_list() {
        let args = json!({"tags": ["a", "b"], "mixed": ["a", 1]});
        assert_eq!(
            arg_opt_str_list(&args, "t", "tags").unwrap().unwrap(),
            vec!["a", "b"]
        );
        assert!(arg_opt_str_list(&args, "t", "mixed").is_err());
        assert!(arg_opt_str_list(&args, "t", "missing").unwrap().is_none());
    }
}
