//! Model sub-server: task-class routing and runtime management over MCP.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{arg_bool_or, arg_opt_str, arg_str};
use crate::error::{HubResult, McpError};
use crate::mcp::{SubServer, ToolDef, ToolRegistry};
use crate::model::{ChatMessage, MessageRole, ModelRouter, RouteOptions, TaskClass};

/// MCP surface over the model router.
pub struct ModelServer {
    router: Arc<ModelRouter>,
    registry: ToolRegistry,
}

impl ModelServer {
    /// Build the sub-server and its tool registry.
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self {
            router,
            registry: build_registry(),
        }
    }

    async fn chat(&self, args: &Value) -> HubResult<Value> {
        let messages = parse_messages(args)?;
        let model = arg_opt_str(args, "model");
        let outcome = self.router.chat(messages, model.as_deref()).await?;
        Ok(serde_json::to_value(outcome).map_err(McpError::Json)?)
    }

    async fn complete(&self, args: &Value) -> HubResult<Value> {
        let prompt = arg_str(args, "complete", "prompt")?;
        let opts = RouteOptions {
            model: arg_opt_str(args, "model"),
            system: arg_opt_str(args, "system"),
        };
        let outcome = self.router.route(TaskClass::General, &prompt, opts).await?;
        Ok(serde_json::to_value(outcome).map_err(McpError::Json)?)
    }

    async fn embed(&self, args: &Value) -> HubResult<Value> {
        let text = arg_str(args, "embed", "text")?;
        let model = arg_opt_str(args, "model");
        let (model, embedding) = self.router.embed(&text, model.as_deref()).await?;
        Ok(json!({
            "model": model,
            "dimensions": embedding.len(),
            "embedding": embedding,
        }))
    }

    async fn vision(&self, args: &Value) -> HubResult<Value> {
        let image = arg_str(args, "vision", "image")?;
        let prompt = arg_opt_str(args, "prompt")
            .unwrap_or_else(|| "Describe this image.".to_string());
        let model = arg_opt_str(args, "model");
        let outcome = self.router.vision(&image, &prompt, model.as_deref()).await?;
        Ok(serde_json::to_value(outcome).map_err(McpError::Json)?)
    }

    async fn list_models(&self, args: &Value) -> HubResult<Value> {
        let force_refresh = arg_bool_or(args, "forceRefresh", false);
        let models = self.router.list(force_refresh).await?;
        Ok(json!({"count": models.len(), "models": models}))
    }

    async fn get_model_info(&self, args: &Value) -> HubResult<Value> {
        let model = arg_str(args, "get_model_info", "model")?;
        let info = self.router.info(&model).await?;
        Ok(json!({"model": model, "info": info}))
    }

    async fn pull_model(&self, args: &Value) -> HubResult<Value> {
        let model = arg_str(args, "pull_model", "model")?;
        let status = self.router.pull(&model).await?;
        Ok(json!({"model": model, "status": status}))
    }

    async fn set_default_model(&self, args: &Value) -> HubResult<Value> {
        let class: TaskClass = arg_str(args, "set_default_model", "taskClass")?
            .parse()
            .map_err(|e| McpError::InvalidParameters {
                tool_name: "set_default_model".to_string(),
                message: e,
            })?;
        let model = arg_str(args, "set_default_model", "model")?;
        self.router.set_default(class, &model).await;
        Ok(json!({"success": true, "taskClass": class.to_string(), "model": model}))
    }

    async fn reasoning(&self, args: &Value) -> HubResult<Value> {
        let prompt = arg_str(args, "reasoning", "prompt")?;
        let opts = RouteOptions {
            model: arg_opt_str(args, "model"),
            system: arg_opt_str(args, "system"),
        };
        let outcome = self.router.route(TaskClass::Reasoning, &prompt, opts).await?;
        Ok(serde_json::to_value(outcome).map_err(McpError::Json)?)
    }

    async fn coding(&self, args: &Value) -> HubResult<Value> {
        let prompt = arg_str(args, "coding", "prompt")?;
        let prompt = match arg_opt_str(args, "language") {
            Some(language) => format!("[language: {}]\n{}", language, prompt),
            None => prompt,
        };
        let opts = RouteOptions {
            model: arg_opt_str(args, "model"),
            system: arg_opt_str(args, "system"),
        };
        let outcome = self.router.route(TaskClass::Coding, &prompt, opts).await?;
        Ok(serde_json::to_value(outcome).map_err(McpError::Json)?)
    }
}

fn parse_messages(args: &Value) -> Result<Vec<ChatMessage>, McpError> {
    let raw = args
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| McpError::InvalidParameters {
            tool_name: "chat".to_string(),
            message: "messages must be a non-empty array".to_string(),
        })?;
    if raw.is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "chat".to_string(),
            message: "messages must be a non-empty array".to_string(),
        });
    }

    raw.iter()
        .map(|m| {
            let role = match m.get("role").and_then(Value::as_str) {
                Some("system") => MessageRole::System,
                Some("user") => MessageRole::User,
                Some("assistant") => MessageRole::Assistant,
                other => {
                    return Err(McpError::InvalidParameters {
                        tool_name: "chat".to_string(),
                        message: format!("invalid message role: {:?}", other),
                    })
                }
            };
            let content = m
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| McpError::InvalidParameters {
                    tool_name: "chat".to_string(),
                    message: "message content must be a string".to_string(),
                })?;
            Ok(ChatMessage {
                role,
                content: content.to_string(),
                images: None,
            })
        })
        .collect()
}

#[async_trait]
impl SubServer for ModelServer {
    fn name(&self) -> &'static str {
        "model"
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value> {
        match tool {
            "chat" => self.chat(&args).await,
            "complete" => self.complete(&args).await,
            "embed" => self.embed(&args).await,
            "vision" => self.vision(&args).await,
            "list_models" => self.list_models(&args).await,
            "get_model_info" => self.get_model_info(&args).await,
            "pull_model" => self.pull_model(&args).await,
            "set_default_model" => self.set_default_model(&args).await,
            "reasoning" => self.reasoning(&args).await,
            "coding" => self.coding(&args).await,
            other => Err(McpError::UnknownTool {
                tool_name: other.to_string(),
            }
            .into()),
        }
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolDef::new(
        "chat",
        "Multi-turn chat with a local model.",
        json!({
            "type": "object",
            "properties": {
                "messages": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": { "type": "string", "enum": ["system", "user", "assistant"] },
                            "content": { "type": "string" }
                        },
                        "required": ["role", "content"]
                    }
                },
                "model": { "type": "string" }
            },
            "required": ["messages"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "complete",
        "One-shot completion routed to the general model.",
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "model": { "type": "string" },
                "system": { "type": "string" }
            },
            "required": ["prompt"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "embed",
        "Embedding vector for a text.",
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "model": { "type": "string" }
            },
            "required": ["text"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "vision",
        "Describe or analyze a base64-encoded image.",
        json!({
            "type": "object",
            "properties": {
                "image": { "type": "string", "description": "Base64-encoded image data" },
                "prompt": { "type": "string" },
                "model": { "type": "string" }
            },
            "required": ["image"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "list_models",
        "Locally available models from the cached inventory.",
        json!({
            "type": "object",
            "properties": {
                "forceRefresh": { "type": "boolean" }
            },
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_model_info",
        "Details of one model.",
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string" }
            },
            "required": ["model"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "pull_model",
        "Pull a model into the local runtime; idempotent.",
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string" }
            },
            "required": ["model"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "set_default_model",
        "Override the default model for a task class in this process.",
        json!({
            "type": "object",
            "properties": {
                "taskClass": {
                    "type": "string",
                    "enum": ["reasoning", "coding", "vision", "chat", "embedding", "general"]
                },
                "model": { "type": "string" }
            },
            "required": ["taskClass", "model"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "reasoning",
        "Route a prompt to the reasoning-class model.",
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "model": { "type": "string" },
                "system": { "type": "string" }
            },
            "required": ["prompt"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "coding",
        "Route a prompt to the coding-class model, with an optional language hint.",
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "language": { "type": "string" },
                "model": { "type": "string" },
                "system": { "type": "string" }
            },
            "required": ["prompt"],
            "additionalProperties": false
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_model_surface() {
        let registry = build_registry();
        let names = registry.names();
        for expected in [
            "chat",
            "complete",
            "embed",
            "vision",
            "list_models",
            "get_model_info",
            "pull_model",
            "set_default_model",
            "reasoning",
            "coding",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_parse_messages() {
        let args = json!({"messages": [
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "hi"}
        ]});
        let messages = parse_messages(&args).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].role, MessageRole::System));

        assert!(parse_messages(&json!({"messages": []})).is_err());
        assert!(parse_messages(&json!({})).is_err());
        assert!(parse_messages(&json!({"messages": [{"role": "narrator", "content": "x"}]})).is_err());
    }
}
