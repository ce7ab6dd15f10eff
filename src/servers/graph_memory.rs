//! Graph-memory sub-server: entity and relationship tools over the store.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{arg_opt_object, arg_opt_str, arg_str, arg_u64_or};
use crate::error::{HubResult, McpError};
use crate::graph::{Direction, EntityOps, RelationshipOps, TraversalOps};
use crate::mcp::{ResourceContents, ResourceDef, SubServer, ToolDef, ToolRegistry};

const LABELS_URI: &str = "graph://labels";

/// MCP surface over entity, relationship, and traversal ops.
pub struct GraphMemoryServer {
    entities: EntityOps,
    relationships: RelationshipOps,
    traversal: TraversalOps,
    registry: ToolRegistry,
}

impl GraphMemoryServer {
    /// Build the sub-server and its tool registry.
    pub fn new(entities: EntityOps, relationships: RelationshipOps, traversal: TraversalOps) -> Self {
        Self {
            entities,
            relationships,
            traversal,
            registry: build_registry(),
        }
    }

    async fn create_entity(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "create_entity", "label")?;
        let id = arg_str(args, "create_entity", "id")?;
        let mut props = arg_opt_object(args, "create_entity", "properties")?.unwrap_or_default();
        props.insert("id".to_string(), json!(id));

        let entity = self.entities.create(&label, props).await?;
        Ok(json!({"success": true, "entity": entity}))
    }

    async fn create_entities(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "create_entities", "label")?;
        let raw = args
            .get("entities")
            .and_then(Value::as_array)
            .ok_or_else(|| McpError::InvalidParameters {
                tool_name: "create_entities".to_string(),
                message: "entities must be an array of objects".to_string(),
            })?;
        let mut batch = Vec::with_capacity(raw.len());
        for item in raw {
            match item {
                Value::Object(map) => batch.push(map.clone()),
                _ => {
                    return Err(McpError::InvalidParameters {
                        tool_name: "create_entities".to_string(),
                        message: "entities must be an array of objects".to_string(),
                    }
                    .into())
                }
            }
        }

        let created = self.entities.create_batch(&label, batch).await?;
        Ok(json!({"success": true, "created": created}))
    }

    async fn get_entity(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "get_entity", "label")?;
        let id = arg_str(args, "get_entity", "id")?;

        match self.entities.get(&label, &id).await? {
            Some(entity) => Ok(json!({"success": true, "entity": entity})),
            None => Ok(json!({"success": false, "found": false, "label": label, "id": id})),
        }
    }

    async fn find_entities(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "find_entities", "label")?;
        let match_props = arg_opt_object(args, "find_entities", "properties")?.unwrap_or_default();
        let limit = arg_u64_or(args, "limit", 25) as usize;

        let entities = self.entities.find(&label, &match_props, limit).await?;
        Ok(json!({"success": true, "count": entities.len(), "entities": entities}))
    }

    async fn update_entity(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "update_entity", "label")?;
        let id = arg_str(args, "update_entity", "id")?;
        let props = arg_opt_object(args, "update_entity", "properties")?.ok_or_else(|| {
            McpError::InvalidParameters {
                tool_name: "update_entity".to_string(),
                message: "properties is required".to_string(),
            }
        })?;

        let entity = self.entities.update(&label, &id, props).await?;
        Ok(json!({"success": true, "entity": entity}))
    }

    async fn delete_entity(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "delete_entity", "label")?;
        let id = arg_str(args, "delete_entity", "id")?;

        let deleted = self.entities.delete(&label, &id).await?;
        Ok(json!({"success": true, "deleted": deleted}))
    }

    async fn count_entities(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "count_entities", "label")?;
        let count = self.entities.count(&label).await?;
        Ok(json!({"success": true, "label": label, "count": count}))
    }

    async fn create_relationship(&self, args: &Value) -> HubResult<Value> {
        let from_label = arg_str(args, "create_relationship", "fromLabel")?;
        let from_id = arg_str(args, "create_relationship", "fromId")?;
        let rel_type = arg_str(args, "create_relationship", "type")?;
        let to_label = arg_str(args, "create_relationship", "toLabel")?;
        let to_id = arg_str(args, "create_relationship", "toId")?;
        let props = arg_opt_object(args, "create_relationship", "properties")?;

        let relationship = self
            .relationships
            .create((&from_label, &from_id), &rel_type, (&to_label, &to_id), props)
            .await?;
        Ok(json!({"success": true, "relationship": relationship, "type": rel_type}))
    }

    async fn get_relationships(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "get_relationships", "label")?;
        let id = arg_str(args, "get_relationships", "id")?;
        let direction = match arg_opt_str(args, "direction") {
            Some(text) => text
                .parse::<Direction>()
                .map_err(|e| McpError::InvalidParameters {
                    tool_name: "get_relationships".to_string(),
                    message: e,
                })?,
            None => Direction::Both,
        };
        let rel_type = arg_opt_str(args, "type");

        let views = self
            .relationships
            .get_for(&label, &id, direction, rel_type.as_deref())
            .await?;
        let relationships: Vec<Value> = views
            .into_iter()
            .map(|v| {
                json!({
                    "type": v.rel_type,
                    "properties": v.properties,
                    "other": v.other,
                    "otherLabels": v.other_labels,
                })
            })
            .collect();
        Ok(json!({"success": true, "count": relationships.len(), "relationships": relationships}))
    }

    async fn delete_relationship(&self, args: &Value) -> HubResult<Value> {
        let from_label = arg_str(args, "delete_relationship", "fromLabel")?;
        let from_id = arg_str(args, "delete_relationship", "fromId")?;
        let rel_type = arg_str(args, "delete_relationship", "type")?;
        let to_label = arg_str(args, "delete_relationship", "toLabel")?;
        let to_id = arg_str(args, "delete_relationship", "toId")?;

        let deleted = self
            .relationships
            .delete((&from_label, &from_id), &rel_type, (&to_label, &to_id))
            .await?;
        Ok(json!({"success": true, "deleted": deleted}))
    }

    async fn count_relationships(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "count_relationships", "label")?;
        let id = arg_str(args, "count_relationships", "id")?;
        let rel_type = arg_opt_str(args, "type");

        let count = self
            .relationships
            .count_for(&label, &id, rel_type.as_deref())
            .await?;
        Ok(json!({"success": true, "count": count}))
    }

    async fn query_graph(&self, args: &Value) -> HubResult<Value> {
        let mode = arg_str(args, "query_graph", "mode")?;
        let label = arg_str(args, "query_graph", "label")?;
        let id = arg_str(args, "query_graph", "id")?;
        let max_depth = arg_u64_or(args, "maxDepth", 3) as u32;

        match mode.as_str() {
            "connected" => {
                let nodes = self.traversal.connected(&label, &id, max_depth).await?;
                Ok(json!({"success": true, "mode": "connected", "count": nodes.len(), "nodes": nodes}))
            }
            "path" => {
                let to_label = arg_str(args, "query_graph", "toLabel")?;
                let to_id = arg_str(args, "query_graph", "toId")?;
                let limit = arg_u64_or(args, "limit", 10) as usize;
                let paths = self
                    .traversal
                    .all_paths((&label, &id), (&to_label, &to_id), max_depth, limit)
                    .await?;
                Ok(json!({"success": true, "mode": "path", "count": paths.len(), "paths": paths}))
            }
            "stats" => {
                let stats = self.traversal.rel_stats(&label, &id).await?;
                Ok(json!({"success": true, "mode": "stats", "stats": stats}))
            }
            "subgraph" => {
                let node_cap = arg_u64_or(args, "nodeCap", 100) as usize;
                let view = self.traversal.subgraph(&label, &id, max_depth, node_cap).await?;
                Ok(json!({"success": true, "mode": "subgraph", "subgraph": view}))
            }
            other => Err(McpError::InvalidParameters {
                tool_name: "query_graph".to_string(),
                message: format!(
                    "unknown mode: {} (expected connected, path, stats, or subgraph)",
                    other
                ),
            }
            .into()),
        }
    }

    async fn find_shortest_path(&self, args: &Value) -> HubResult<Value> {
        let from_label = arg_str(args, "find_shortest_path", "fromLabel")?;
        let from_id = arg_str(args, "find_shortest_path", "fromId")?;
        let to_label = arg_str(args, "find_shortest_path", "toLabel")?;
        let to_id = arg_str(args, "find_shortest_path", "toId")?;
        let max_depth = arg_u64_or(args, "maxDepth", 5) as u32;

        let path = self
            .traversal
            .shortest_path((&from_label, &from_id), (&to_label, &to_id), max_depth)
            .await?;
        match path {
            Some(path) => Ok(json!({"success": true, "found": true, "path": path})),
            None => Ok(json!({"success": true, "found": false})),
        }
    }

    async fn search_entities(&self, args: &Value) -> HubResult<Value> {
        let label = arg_str(args, "search_entities", "label")?;
        let text = arg_str(args, "search_entities", "query")?;
        let fields = super::arg_opt_str_list(args, "search_entities", "fields")?
            .unwrap_or_else(|| vec!["name".to_string()]);
        let limit = arg_u64_or(args, "limit", 25) as usize;

        let entities = self
            .traversal
            .search_by_text(&label, &text, &fields, limit)
            .await?;
        Ok(json!({"success": true, "count": entities.len(), "entities": entities}))
    }
}

#[async_trait]
impl SubServer for GraphMemoryServer {
    fn name(&self) -> &'static str {
        "graph-memory"
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value> {
        match tool {
            "create_entity" => self.create_entity(&args).await,
            "create_entities" => self.create_entities(&args).await,
            "get_entity" => self.get_entity(&args).await,
            "find_entities" => self.find_entities(&args).await,
            "update_entity" => self.update_entity(&args).await,
            "delete_entity" => self.delete_entity(&args).await,
            "count_entities" => self.count_entities(&args).await,
            "create_relationship" => self.create_relationship(&args).await,
            "get_relationships" => self.get_relationships(&args).await,
            "delete_relationship" => self.delete_relationship(&args).await,
            "count_relationships" => self.count_relationships(&args).await,
            "query_graph" => self.query_graph(&args).await,
            "find_shortest_path" => self.find_shortest_path(&args).await,
            "search_entities" => self.search_entities(&args).await,
            other => Err(McpError::UnknownTool {
                tool_name: other.to_string(),
            }
            .into()),
        }
    }

    async fn list_resources(&self) -> Vec<ResourceDef> {
        vec![ResourceDef {
            uri: LABELS_URI.to_string(),
            name: "Entity labels".to_string(),
            description: "Distinct node labels with counts".to_string(),
            mime_type: "application/json".to_string(),
        }]
    }

    async fn read_resource(&self, uri: &str) -> HubResult<ResourceContents> {
        if uri != LABELS_URI {
            return Err(McpError::UnknownResource {
                uri: uri.to_string(),
            }
            .into());
        }
        let labels = self.entities.list_labels().await?;
        let mut body = Map::new();
        for (label, count) in labels {
            body.insert(label, json!(count));
        }
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: "application/json".to_string(),
            text: serde_json::to_string_pretty(&Value::Object(body))
                .unwrap_or_else(|_| "{}".to_string()),
        })
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolDef::new(
        "create_entity",
        "Create a graph entity with a label, unique id, and properties.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string", "description": "Category tag, e.g. Person" },
                "id": { "type": "string", "description": "Identifier unique within the label" },
                "properties": { "type": "object", "description": "Scalar or list-of-scalar properties" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "create_entities",
        "Create several entities of one label atomically; any failure rolls back all.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "entities": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Property objects, each with a unique id"
                }
            },
            "required": ["label", "entities"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_entity",
        "Fetch one entity by (label, id).",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "find_entities",
        "Find entities of a label whose properties match by equality.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "properties": { "type": "object", "description": "Equality match properties" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            },
            "required": ["label"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "update_entity",
        "Merge properties into an existing entity.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" },
                "properties": { "type": "object" }
            },
            "required": ["label", "id", "properties"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "delete_entity",
        "Delete an entity and all of its relationships.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "count_entities",
        "Count entities carrying a label.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" }
            },
            "required": ["label"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "create_relationship",
        "Create a directed typed relationship between two existing entities.",
        json!({
            "type": "object",
            "properties": {
                "fromLabel": { "type": "string" },
                "fromId": { "type": "string" },
                "type": { "type": "string", "description": "Relationship type, conventionally UPPER_SNAKE" },
                "toLabel": { "type": "string" },
                "toId": { "type": "string" },
                "properties": { "type": "object" }
            },
            "required": ["fromLabel", "fromId", "type", "toLabel", "toId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_relationships",
        "List relationships attached to an entity with the far endpoints.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" },
                "direction": { "type": "string", "enum": ["in", "out", "both"] },
                "type": { "type": "string" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "delete_relationship",
        "Delete one relationship between two entities.",
        json!({
            "type": "object",
            "properties": {
                "fromLabel": { "type": "string" },
                "fromId": { "type": "string" },
                "type": { "type": "string" },
                "toLabel": { "type": "string" },
                "toId": { "type": "string" }
            },
            "required": ["fromLabel", "fromId", "type", "toLabel", "toId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "count_relationships",
        "Count relationships attached to an entity, optionally by type.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "id": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": ["label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "query_graph",
        "Traverse the graph: connected set, paths to a target, or relationship stats.",
        json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["connected", "path", "stats", "subgraph"] },
                "label": { "type": "string" },
                "id": { "type": "string" },
                "maxDepth": { "type": "integer", "minimum": 1, "maximum": 10 },
                "toLabel": { "type": "string", "description": "Target label (path mode)" },
                "toId": { "type": "string", "description": "Target id (path mode)" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                "nodeCap": { "type": "integer", "minimum": 1, "maximum": 500 }
            },
            "required": ["mode", "label", "id"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "find_shortest_path",
        "Shortest path between two entities within a depth bound.",
        json!({
            "type": "object",
            "properties": {
                "fromLabel": { "type": "string" },
                "fromId": { "type": "string" },
                "toLabel": { "type": "string" },
                "toId": { "type": "string" },
                "maxDepth": { "type": "integer", "minimum": 1, "maximum": 10 }
            },
            "required": ["fromLabel", "fromId", "toLabel", "toId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "search_entities",
        "Case-insensitive substring search over listed property fields.",
        json!({
            "type": "object",
            "properties": {
                "label": { "type": "string" },
                "query": { "type": "string" },
                "fields": { "type": "array", "items": { "type": "string" } },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            },
            "required": ["label", "query"],
            "additionalProperties": false
        }),
    ));

    registry
}
