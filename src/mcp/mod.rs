//! MCP tool registry, dispatch, and discovery.
//!
//! Sub-servers register typed tools in a `ToolRegistry`; the `Dispatcher`
//! routes the four MCP operations across sub-servers, wraps every call in
//! the governance pipeline, and notifies dispatch sinks.

mod discovery;
mod dispatcher;
mod sinks;

pub use discovery::{ServerStatus, SubServerEntry, SubServerRegistry};
pub use dispatcher::Dispatcher;
pub use sinks::{DispatchEvent, DispatchSink, MetricsSink, TracingSink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorKind, HubError, HubResult, McpError, McpResult};

/// A registered tool: metadata plus the schema its arguments must satisfy.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDef {
    /// Define a tool with a JSON-Schema object descriptor.
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Ordered tool registry owned by one sub-server.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; panics on duplicate names (registration is static).
    pub fn register(&mut self, tool: ToolDef) {
        assert!(
            self.get(&tool.name).is_none(),
            "duplicate tool registration: {}",
            tool.name
        );
        self.tools.push(tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tools in registration order.
    pub fn list(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Registered tool names in order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// Validate arguments against a tool's input schema.
    ///
    /// Checks that args form an object, every `required` property is present,
    /// and present properties match their declared primitive type.
    pub fn validate(&self, name: &str, args: &Value) -> McpResult<()> {
        let tool = self.get(name).ok_or_else(|| McpError::UnknownTool {
            tool_name: name.to_string(),
        })?;

        let Value::Object(args_map) = args else {
            return Err(McpError::InvalidParameters {
                tool_name: name.to_string(),
                message: "arguments must be an object".to_string(),
            });
        };

        if let Some(required) = tool.input_schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !args_map.contains_key(field) {
                    return Err(McpError::InvalidParameters {
                        tool_name: name.to_string(),
                        message: format!("missing required field: {}", field),
                    });
                }
            }
        }

        if let Some(properties) = tool.input_schema.get("properties").and_then(Value::as_object) {
            for (key, value) in args_map {
                let Some(declared) = properties.get(key).and_then(|p| p.get("type")) else {
                    continue;
                };
                let Some(expected) = declared.as_str() else {
                    continue;
                };
                if !value_matches_type(value, expected) {
                    return Err(McpError::InvalidParameters {
                        tool_name: name.to_string(),
                        message: format!("field {} must be of type {}", key, expected),
                    });
                }
            }
        }

        Ok(())
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Tool result content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Uniform envelope returned by every tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Wrap a successful result value.
    pub fn success(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {}\"}}", e));
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: None,
        }
    }

    /// Wrap a failure as `{error, kind, tool, details?}` text content.
    pub fn failure(tool: &str, error: &HubError) -> Self {
        Self::failure_with_kind(tool, error.kind(), &error.to_string())
    }

    /// Wrap a failure with an explicit taxonomy kind.
    pub fn failure_with_kind(tool: &str, kind: ErrorKind, message: &str) -> Self {
        let body = json!({
            "error": message,
            "kind": kind.as_str(),
            "tool": tool,
        });
        Self {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: body.to_string(),
            }],
            is_error: Some(true),
        }
    }

    /// Whether this envelope carries an error.
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// The first text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(|c| c.text.as_str())
    }
}

/// A resource a sub-server exposes by URI.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Contents of a read resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
}

/// A named sub-server composing backend operations into MCP tools.
///
/// `handle` runs after registry lookup and schema validation; it never sees
/// an unknown tool or malformed arguments.
#[async_trait]
pub trait SubServer: Send + Sync {
    /// Stable sub-server name (e.g. `graph-memory`).
    fn name(&self) -> &'static str;

    /// The tool registry owned by this sub-server.
    fn registry(&self) -> &ToolRegistry;

    /// Execute a validated tool call.
    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value>;

    /// Resources this sub-server exposes. Most expose none.
    async fn list_resources(&self) -> Vec<ResourceDef> {
        Vec::new()
    }

    /// Read one resource by URI.
    async fn read_resource(&self, uri: &str) -> HubResult<ResourceContents> {
        Err(McpError::UnknownResource {
            uri: uri.to_string(),
        }
        .into())
    }
}

/// Run the uniform call protocol against one sub-server.
///
/// Unknown tools return an error envelope without invoking anything;
/// validation failures surface as `InvalidInput`; handler errors are wrapped,
/// never propagated.
pub async fn call_tool(server: &dyn SubServer, tool: &str, args: Value) -> ToolCallResult {
    if server.registry().get(tool).is_none() {
        return ToolCallResult::failure_with_kind(
            tool,
            ErrorKind::NotFound,
            &format!("tool not found: {}", tool),
        );
    }

    if let Err(e) = server.registry().validate(tool, &args) {
        return ToolCallResult::failure(tool, &HubError::Mcp(e));
    }

    match server.handle(tool, args).await {
        Ok(value) => ToolCallResult::success(&value),
        Err(e) => ToolCallResult::failure(tool, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoServer {
        registry: ToolRegistry,
    }

    impl EchoServer {
        fn new() -> Self {
            let mut registry = ToolRegistry::new();
            registry.register(ToolDef::new(
                "echo",
                "Echo the message back.",
                json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" },
                        "count": { "type": "integer" }
                    },
                    "required": ["message"],
                    "additionalProperties": false
                }),
            ));
            Self { registry }
        }
    }

    #[async_trait]
    impl SubServer for EchoServer {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn registry(&self) -> &ToolRegistry {
            &self.registry
        }

        async fn handle(&self, _tool: &str, args: Value) -> HubResult<Value> {
            Ok(json!({"echoed": args["message"]}))
        }
    }

    #[test]
    fn test_registry_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDef::new("b_tool", "second letter", json!({"type": "object"})));
        registry.register(ToolDef::new("a_tool", "first letter", json!({"type": "object"})));
        assert_eq!(registry.names(), vec!["b_tool", "a_tool"]);
    }

    #[test]
    #[should_panic(expected = "duplicate tool registration")]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDef::new("t", "one", json!({})));
        registry.register(ToolDef::new("t", "two", json!({})));
    }

    #[test]
    fn test_validate_required_fields() {
        let server = EchoServer::new();
        assert!(server
            .registry()
            .validate("echo", &json!({"message": "hi"}))
            .is_ok());
        assert!(server.registry().validate("echo", &json!({})).is_err());
        assert!(server.registry().validate("echo", &json!("string")).is_err());
    }

    #[test]
    fn test_validate_property_types() {
        let server = EchoServer::new();
        assert!(server
            .registry()
            .validate("echo", &json!({"message": 42}))
            .is_err());
        assert!(server
            .registry()
            .validate("echo", &json!({"message": "hi", "count": 2}))
            .is_ok());
        assert!(server
            .registry()
            .validate("echo", &json!({"message": "hi", "count": 2.5}))
            .is_err());
    }

    #[tokio::test]
    async fn test_call_tool_unknown_tool_envelope() {
        let server = EchoServer::new();
        let result = call_tool(&server, "missing", json!({})).await;
        assert!(result.is_error());
        assert!(result.text().unwrap().contains("tool not found"));
    }

    #[tokio::test]
    async fn test_call_tool_validation_failure() {
        let server = EchoServer::new();
        let result = call_tool(&server, "echo", json!({})).await;
        assert!(result.is_error());
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["kind"], "invalid_input");
        assert_eq!(body["tool"], "echo");
    }

    #[tokio::test]
    async fn test_call_tool_success_envelope() {
        let server = EchoServer::new();
        let result = call_tool(&server, "echo", json!({"message": "hi"})).await;
        assert!(!result.is_error());
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["echoed"], "hi");
    }

    #[test]
    fn test_envelope_serialization_shape() {
        let result = ToolCallResult::success(&json!({"ok": true}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert!(json.get("isError").is_none());

        let result = ToolCallResult::failure_with_kind("t", ErrorKind::Internal, "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
    }
}
