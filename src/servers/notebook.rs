//! Notebook sub-server: vault I/O over MCP.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{arg_bool_or, arg_opt_object, arg_str, arg_u64_or};
use crate::error::{HubResult, McpError};
use crate::mcp::{ResourceContents, ResourceDef, SubServer, ToolDef, ToolRegistry};
use crate::vault::{Frontmatter, NotebookVault, SortOrder};

/// How many recent notes surface as resources.
const RESOURCE_LIMIT: usize = 20;

/// MCP surface over the notebook vault.
pub struct NotebookServer {
    vault: NotebookVault,
    registry: ToolRegistry,
}

impl NotebookServer {
    /// Build the sub-server and its tool registry.
    pub fn new(vault: NotebookVault) -> Self {
        Self {
            vault,
            registry: build_registry(),
        }
    }

    async fn write_note(&self, args: &Value) -> HubResult<Value> {
        let name = arg_str(args, "write_note", "name")?;
        let body = arg_str(args, "write_note", "content")?;
        let fm = arg_opt_object(args, "write_note", "frontmatter")?
            .map(|map| map.into_iter().collect::<Frontmatter>());

        let path = self.vault.write(&name, &body, fm.as_ref()).await?;
        Ok(json!({"success": true, "path": path.display().to_string()}))
    }

    async fn append_note(&self, args: &Value) -> HubResult<Value> {
        let name = arg_str(args, "append_note", "name")?;
        let body = arg_str(args, "append_note", "content")?;

        let path = self.vault.append(&name, &body).await?;
        Ok(json!({"success": true, "path": path.display().to_string()}))
    }

    async fn read_note(&self, args: &Value) -> HubResult<Value> {
        let name = arg_str(args, "read_note", "name")?;
        let (fm, body) = self.vault.read(&name).await?;
        Ok(json!({
            "success": true,
            "name": name,
            "frontmatter": Value::Object(fm.to_json()),
            "content": body,
        }))
    }

    async fn list_notes(&self, args: &Value) -> HubResult<Value> {
        let limit = arg_u64_or(args, "limit", 25) as usize;
        let order = match args.get("order").and_then(Value::as_str) {
            Some(text) => text
                .parse::<SortOrder>()
                .map_err(|e| McpError::InvalidParameters {
                    tool_name: "list_notes".to_string(),
                    message: e,
                })?,
            None => SortOrder::Newest,
        };

        let notes = self.vault.list(limit, order).await?;
        Ok(json!({"success": true, "count": notes.len(), "notes": notes}))
    }

    async fn search_notes(&self, args: &Value) -> HubResult<Value> {
        let query = arg_str(args, "search_notes", "query")?;
        let search_body = arg_bool_or(args, "searchContent", false);

        let matches = self.vault.search(&query, search_body).await?;
        Ok(json!({"success": true, "count": matches.len(), "matches": matches}))
    }
}

#[async_trait]
impl SubServer for NotebookServer {
    fn name(&self) -> &'static str {
        "notebook"
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value> {
        match tool {
            "write_note" => self.write_note(&args).await,
            "append_note" => self.append_note(&args).await,
            "read_note" => self.read_note(&args).await,
            "list_notes" => self.list_notes(&args).await,
            "search_notes" => self.search_notes(&args).await,
            other => Err(McpError::UnknownTool {
                tool_name: other.to_string(),
            }
            .into()),
        }
    }

    async fn list_resources(&self) -> Vec<ResourceDef> {
        let notes = self
            .vault
            .list(RESOURCE_LIMIT, SortOrder::Newest)
            .await
            .unwrap_or_default();
        notes
            .into_iter()
            .map(|note| ResourceDef {
                uri: format!("note://{}", note.name),
                name: note.name,
                description: "Vault note".to_string(),
                mime_type: "text/markdown".to_string(),
            })
            .collect()
    }

    async fn read_resource(&self, uri: &str) -> HubResult<ResourceContents> {
        let name = uri
            .strip_prefix("note://")
            .ok_or_else(|| McpError::UnknownResource {
                uri: uri.to_string(),
            })?;
        let (fm, body) = self.vault.read(name).await?;
        let text = if fm.is_empty() {
            body
        } else {
            format!("{}\n{}", crate::vault::format_frontmatter(&fm), body)
        };
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: "text/markdown".to_string(),
            text,
        })
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolDef::new(
        "write_note",
        "Atomically replace a note, with optional frontmatter.",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Note filename (no path separators)" },
                "content": { "type": "string" },
                "frontmatter": { "type": "object" }
            },
            "required": ["name", "content"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "append_note",
        "Append to a note with a blank-line separator, creating it when absent.",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["name", "content"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "read_note",
        "Read a note, split into frontmatter and body.",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" }
            },
            "required": ["name"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "list_notes",
        "List notes sorted by modification time.",
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 },
                "order": { "type": "string", "enum": ["newest", "oldest"] }
            },
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "search_notes",
        "Search notes by filename, optionally scanning content.",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "searchContent": { "type": "boolean" }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_vault_surface() {
        let registry = build_registry();
        assert_eq!(
            registry.names(),
            vec![
                "write_note",
                "append_note",
                "read_note",
                "list_notes",
                "search_notes"
            ]
        );
    }
}
