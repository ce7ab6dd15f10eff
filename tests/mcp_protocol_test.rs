//! Protocol-shape tests for the MCP surface.
//!
//! Verifies tool definitions, envelope wire shapes, and registry validation
//! behavior across the real sub-server registries.

use serde_json::{json, Value};

use mcp_memory_hub::error::ErrorKind;
use mcp_memory_hub::mcp::{ToolCallResult, ToolDef, ToolRegistry};
use mcp_memory_hub::server::JsonRpcResponse;

fn sample_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ToolDef::new(
        "create_entity",
        "Create a graph entity.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" },
                "properties": { "type": "object" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));
    registry
}

#[test]
fn test_tool_def_serializes_with_camel_case_schema_key() {
    let registry = sample_registry();
    let json = serde_json::to_value(registry.list()).unwrap();
    assert_eq!(json[0]["name"], "create_entity");
    assert!(json[0]["inputSchema"]["properties"]["label"].is_object());
    assert!(json[0].get("input_schema").is_none());
}

#[test]
fn test_validation_accepts_matching_args() {
    let registry = sample_registry();
    assert!(registry
        .validate(
            "create_entity",
            &json!({"label": "Person", "id": "p1", "properties": {"name": "Alice"}})
        )
        .is_ok());
}

#[test]
fn test_validation_rejects_missing_required() {
    let registry = sample_registry();
    let err = registry
        .validate("create_entity", &json!({"label": "Person"}))
        .unwrap_err();
    assert!(err.to_string().contains("id"));
}

#[test]
fn test_validation_rejects_wrong_types() {
    let registry = sample_registry();
    assert!(registry
        .validate("create_entity", &json!({"label": 7, "id": "p1"}))
        .is_err());
    assert!(registry
        .validate(
            "create_entity",
            &json!({"label": "Person", "id": "p1", "properties": "not-an-object"})
        )
        .is_err());
}

#[test]
fn test_success_envelope_wire_shape() {
    let result = ToolCallResult::success(&json!({"success": true, "entity": {"id": "p1"}}));
    let wire = serde_json::to_value(&result).unwrap();

    assert_eq!(wire["content"][0]["type"], "text");
    assert!(wire.get("isError").is_none());

    let inner: Value = serde_json::from_str(wire["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(inner["entity"]["id"], "p1");
}

#[test]
fn test_error_envelope_wire_shape() {
    let result = ToolCallResult::failure_with_kind("create_entity", ErrorKind::Duplicate, "exists");
    let wire = serde_json::to_value(&result).unwrap();

    assert_eq!(wire["isError"], true);
    let inner: Value = serde_json::from_str(wire["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(inner["kind"], "duplicate");
    assert_eq!(inner["tool"], "create_entity");
    assert_eq!(inner["error"], "exists");
}

#[test]
fn test_jsonrpc_envelope_round_trip() {
    let response = JsonRpcResponse::success(Some(json!("req-1")), json!({"tools": []}));
    let wire = serde_json::to_string(&response).unwrap();
    assert!(wire.contains("\"jsonrpc\":\"2.0\""));
    assert!(wire.contains("\"id\":\"req-1\""));
    assert!(!wire.contains("\"error\""));
}

#[test]
fn test_error_kind_status_codes_for_transports() {
    // the mapping an embedding HTTP transport relies on; kinds without a
    // dedicated status answer 500
    for (kind, status) in [
        (ErrorKind::InvalidInput, 400),
        (ErrorKind::NotFound, 404),
        (ErrorKind::GovernanceBlocked, 423),
        (ErrorKind::BackendUnavailable, 503),
        (ErrorKind::Timeout, 503),
        (ErrorKind::Duplicate, 500),
        (ErrorKind::GovernanceInvalidFormat, 500),
        (ErrorKind::Internal, 500),
    ] {
        assert_eq!(kind.http_status(), status, "{:?}", kind);
    }
}
