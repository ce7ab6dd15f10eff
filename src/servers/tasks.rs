//! Task sub-server: hierarchical tasks with typed dependencies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{arg_bool_or, arg_opt_str, arg_opt_str_list, arg_str, arg_u64_or};
use crate::error::{GraphError, HubResult, McpError};
use crate::governance::now_timestamp;
use crate::graph::{Direction, EntityOps, RelationshipOps};
use crate::mcp::{SubServer, ToolDef, ToolRegistry};

const TASK_LABEL: &str = "Task";
const HAS_SUBTASK: &str = "HAS_SUBTASK";

/// Work item status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Deferred,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "deferred" => Ok(TaskStatus::Deferred),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Work item priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(format!("unknown task priority: {}", other)),
        }
    }
}

/// Typed dependency edge between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    MustCompleteBefore,
    ShouldCompleteBefore,
    Blocks,
}

impl DependencyType {
    /// The relationship type written to the graph.
    pub fn edge_type(&self) -> &'static str {
        match self {
            DependencyType::MustCompleteBefore => "MUST_COMPLETE_BEFORE",
            DependencyType::ShouldCompleteBefore => "SHOULD_COMPLETE_BEFORE",
            DependencyType::Blocks => "BLOCKS",
        }
    }

    /// All dependency edge types.
    pub fn all() -> [DependencyType; 3] {
        [
            DependencyType::MustCompleteBefore,
            DependencyType::ShouldCompleteBefore,
            DependencyType::Blocks,
        ]
    }
}

impl std::str::FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MUST_COMPLETE_BEFORE" => Ok(DependencyType::MustCompleteBefore),
            "SHOULD_COMPLETE_BEFORE" => Ok(DependencyType::ShouldCompleteBefore),
            "BLOCKS" => Ok(DependencyType::Blocks),
            other => Err(format!("unknown dependency type: {}", other)),
        }
    }
}

/// Fields accepted by task updates.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<String>,
    pub progress: Option<u64>,
    pub result: Option<String>,
}

/// Task operations persisted in the graph.
pub struct TaskService {
    entities: EntityOps,
    relationships: RelationshipOps,
}

impl TaskService {
    /// Build the service over graph ops.
    pub fn new(entities: EntityOps, relationships: RelationshipOps) -> Self {
        Self {
            entities,
            relationships,
        }
    }

    /// Create a task; with `parent_task_id` it becomes a subtask.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        title: &str,
        description: Option<String>,
        priority: TaskPriority,
        assignee: Option<String>,
        tags: Vec<String>,
        due_date: Option<String>,
        parent_task_id: Option<String>,
    ) -> HubResult<Map<String, Value>> {
        let id = Uuid::new_v4().to_string();
        let mut props = Map::new();
        props.insert("id".to_string(), json!(id));
        props.insert("title".to_string(), json!(title));
        props.insert("status".to_string(), json!(TaskStatus::Pending.to_string()));
        props.insert("priority".to_string(), json!(priority.to_string()));
        props.insert("tags".to_string(), json!(tags));
        props.insert("progress".to_string(), json!(0));
        if let Some(description) = description {
            props.insert("description".to_string(), json!(description));
        }
        if let Some(assignee) = assignee {
            props.insert("assignee".to_string(), json!(assignee));
        }
        if let Some(due_date) = due_date {
            props.insert("due_date".to_string(), json!(due_date));
        }
        if let Some(parent) = &parent_task_id {
            props.insert("parent_task_id".to_string(), json!(parent));
        }

        let task = self.entities.create(TASK_LABEL, props).await?;

        if let Some(parent) = &parent_task_id {
            self.relationships
                .create((TASK_LABEL, parent), HAS_SUBTASK, (TASK_LABEL, &id), None)
                .await?;
        }

        info!(task_id = %id, parent = ?parent_task_id, "Task created");
        Ok(task)
    }

    /// Fetch a task, optionally with shallow subtask summaries.
    pub async fn get(
        &self,
        id: &str,
        include_subtasks: bool,
    ) -> HubResult<(Map<String, Value>, Option<Vec<Value>>)> {
        let task = self
            .entities
            .get(TASK_LABEL, id)
            .await?
            .ok_or_else(|| GraphError::NodeNotFound {
                label: TASK_LABEL.to_string(),
                id: id.to_string(),
            })?;

        let subtasks = if include_subtasks {
            Some(self.subtask_summaries(id).await?)
        } else {
            None
        };
        Ok((task, subtasks))
    }

    /// Merge updated fields; completion forces progress and stamps.
    pub async fn update(&self, id: &str, update: TaskUpdate) -> HubResult<Map<String, Value>> {
        let mut props = Map::new();
        if let Some(title) = update.title {
            props.insert("title".to_string(), json!(title));
        }
        if let Some(description) = update.description {
            props.insert("description".to_string(), json!(description));
        }
        if let Some(priority) = update.priority {
            props.insert("priority".to_string(), json!(priority.to_string()));
        }
        if let Some(assignee) = update.assignee {
            props.insert("assignee".to_string(), json!(assignee));
        }
        if let Some(tags) = update.tags {
            props.insert("tags".to_string(), json!(tags));
        }
        if let Some(due_date) = update.due_date {
            props.insert("due_date".to_string(), json!(due_date));
        }
        if let Some(progress) = update.progress {
            props.insert("progress".to_string(), json!(progress.min(100)));
        }
        if let Some(result) = update.result {
            props.insert("result".to_string(), json!(result));
        }
        if let Some(status) = update.status {
            props.insert("status".to_string(), json!(status.to_string()));
            if status == TaskStatus::Completed {
                props.insert("progress".to_string(), json!(100));
                props.insert("completed_at".to_string(), json!(now_timestamp()));
            }
        }

        let task = self.entities.update(TASK_LABEL, id, props).await?;
        debug!(task_id = %id, "Task updated");
        Ok(task)
    }

    /// Shortcut for a completed transition.
    pub async fn complete(&self, id: &str, result: Option<String>) -> HubResult<Map<String, Value>> {
        self.update(
            id,
            TaskUpdate {
                status: Some(TaskStatus::Completed),
                result,
                ..TaskUpdate::default()
            },
        )
        .await
    }

    /// Delete a task; with `delete_subtasks` the outgoing `HAS_SUBTASK` set
    /// goes first.
    pub async fn delete(&self, id: &str, delete_subtasks: bool) -> HubResult<u64> {
        let mut deleted = 0;
        if delete_subtasks {
            for summary in self.subtask_summaries(id).await? {
                if let Some(child_id) = summary.get("id").and_then(Value::as_str) {
                    if self.entities.delete(TASK_LABEL, child_id).await? {
                        deleted += 1;
                    }
                }
            }
        }
        if self.entities.delete(TASK_LABEL, id).await? {
            deleted += 1;
        }
        info!(task_id = %id, deleted, "Task deleted");
        Ok(deleted)
    }

    /// List tasks by equality filters, post-filtering tags (any-match).
    #[allow(clippy::too_many_arguments)]
    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
        assignee: Option<String>,
        tags: Option<Vec<String>>,
        parent_task_id: Option<String>,
        limit: usize,
    ) -> HubResult<Vec<Map<String, Value>>> {
        let mut match_props = Map::new();
        if let Some(status) = status {
            match_props.insert("status".to_string(), json!(status.to_string()));
        }
        if let Some(priority) = priority {
            match_props.insert("priority".to_string(), json!(priority.to_string()));
        }
        if let Some(assignee) = assignee {
            match_props.insert("assignee".to_string(), json!(assignee));
        }
        if let Some(parent) = parent_task_id {
            match_props.insert("parent_task_id".to_string(), json!(parent));
        }

        let tasks = self.entities.find(TASK_LABEL, &match_props, limit).await?;
        Ok(match tags {
            Some(wanted) if !wanted.is_empty() => tasks
                .into_iter()
                .filter(|task| {
                    task.get("tags")
                        .and_then(Value::as_array)
                        .map(|tags| {
                            tags.iter()
                                .filter_map(Value::as_str)
                                .any(|t| wanted.iter().any(|w| w == t))
                        })
                        .unwrap_or(false)
                })
                .collect(),
            _ => tasks,
        })
    }

    /// Record a typed dependency edge between two tasks.
    pub async fn set_dependency(
        &self,
        task_id: &str,
        depends_on_id: &str,
        dep_type: DependencyType,
    ) -> HubResult<()> {
        self.relationships
            .create(
                (TASK_LABEL, task_id),
                dep_type.edge_type(),
                (TASK_LABEL, depends_on_id),
                None,
            )
            .await?;
        Ok(())
    }

    /// Dependencies of a task in one direction across all typed edges.
    pub async fn get_dependencies(
        &self,
        task_id: &str,
        direction: Direction,
    ) -> HubResult<Vec<Value>> {
        let mut dependencies = Vec::new();
        for dep_type in DependencyType::all() {
            let views = self
                .relationships
                .get_for(TASK_LABEL, task_id, direction, Some(dep_type.edge_type()))
                .await?;
            for view in views {
                dependencies.push(json!({
                    "type": dep_type.edge_type(),
                    "task": {
                        "id": view.other.get("id"),
                        "title": view.other.get("title"),
                        "status": view.other.get("status"),
                    },
                }));
            }
        }
        Ok(dependencies)
    }

    async fn subtask_summaries(&self, id: &str) -> HubResult<Vec<Value>> {
        let views = self
            .relationships
            .get_for(TASK_LABEL, id, Direction::Out, Some(HAS_SUBTASK))
            .await?;
        Ok(views
            .into_iter()
            .map(|v| {
                json!({
                    "id": v.other.get("id"),
                    "title": v.other.get("title"),
                    "status": v.other.get("status"),
                    "priority": v.other.get("priority"),
                    "progress": v.other.get("progress"),
                })
            })
            .collect())
    }
}

/// MCP surface over the task service.
pub struct TaskServer {
    service: Arc<TaskService>,
    registry: ToolRegistry,
}

impl TaskServer {
    /// Build the sub-server and its tool registry.
    pub fn new(service: Arc<TaskService>) -> Self {
        Self {
            service,
            registry: build_registry(),
        }
    }

    async fn create_like(&self, tool: &str, args: &Value, parent_key: &str) -> HubResult<Value> {
        let title = arg_str(args, tool, "title")?;
        let priority = match arg_opt_str(args, "priority") {
            Some(text) => text.parse().map_err(|e: String| McpError::InvalidParameters {
                tool_name: tool.to_string(),
                message: e,
            })?,
            None => TaskPriority::default(),
        };
        let task = self
            .service
            .create(
                &title,
                arg_opt_str(args, "description"),
                priority,
                arg_opt_str(args, "assignee"),
                arg_opt_str_list(args, tool, "tags")?.unwrap_or_default(),
                arg_opt_str(args, "dueDate"),
                arg_opt_str(args, parent_key),
            )
            .await?;
        Ok(json!({"success": true, "task": task}))
    }
}

#[async_trait]
impl SubServer for TaskServer {
    fn name(&self) -> &'static str {
        "tasks"
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn handle(&self, tool: &str, args: Value) -> HubResult<Value> {
        match tool {
            "create_task" => self.create_like("create_task", &args, "parentTaskId").await,
            "add_subtask" => {
                // same shape as create_task, but the parent is required
                arg_str(&args, "add_subtask", "parentTaskId")?;
                self.create_like("add_subtask", &args, "parentTaskId").await
            }
            "get_task" => {
                let id = arg_str(&args, "get_task", "taskId")?;
                let include_subtasks = arg_bool_or(&args, "includeSubtasks", false);
                let (task, subtasks) = self.service.get(&id, include_subtasks).await?;
                let mut body = json!({"success": true, "task": task});
                if let Some(subtasks) = subtasks {
                    body["subtasks"] = json!(subtasks);
                }
                Ok(body)
            }
            "update_task" => {
                let id = arg_str(&args, "update_task", "taskId")?;
                let update = TaskUpdate {
                    title: arg_opt_str(&args, "title"),
                    description: arg_opt_str(&args, "description"),
                    status: super::arg_parsed(&args, "update_task", "status")?,
                    priority: super::arg_parsed(&args, "update_task", "priority")?,
                    assignee: arg_opt_str(&args, "assignee"),
                    tags: arg_opt_str_list(&args, "update_task", "tags")?,
                    due_date: arg_opt_str(&args, "dueDate"),
                    progress: args.get("progress").and_then(Value::as_u64),
                    result: arg_opt_str(&args, "result"),
                };
                let task = self.service.update(&id, update).await?;
                Ok(json!({"success": true, "task": task}))
            }
            "complete_task" => {
                let id = arg_str(&args, "complete_task", "taskId")?;
                let task = self
                    .service
                    .complete(&id, arg_opt_str(&args, "result"))
                    .await?;
                Ok(json!({"success": true, "task": task}))
            }
            "delete_task" => {
                let id = arg_str(&args, "delete_task", "taskId")?;
                let delete_subtasks = arg_bool_or(&args, "deleteSubtasks", false);
                let deleted = self.service.delete(&id, delete_subtasks).await?;
                Ok(json!({"success": true, "deleted": deleted}))
            }
            "list_tasks" => {
                let tasks = self
                    .service
                    .list(
                        super::arg_parsed(&args, "list_tasks", "status")?,
                        super::arg_parsed(&args, "list_tasks", "priority")?,
                        arg_opt_str(&args, "assignee"),
                        arg_opt_str_list(&args, "list_tasks", "tags")?,
                        arg_opt_str(&args, "parentTaskId"),
                        arg_u64_or(&args, "limit", 50) as usize,
                    )
                    .await?;
                Ok(json!({"success": true, "count": tasks.len(), "tasks": tasks}))
            }
            "set_task_dependency" => {
                let task_id = arg_str(&args, "set_task_dependency", "taskId")?;
                let depends_on = arg_str(&args, "set_task_dependency", "dependsOnId")?;
                let dep_type: DependencyType = arg_str(&args, "set_task_dependency", "type")?
                    .parse()
                    .map_err(|e: String| McpError::InvalidParameters {
                        tool_name: "set_task_dependency".to_string(),
                        message: e,
                    })?;
                self.service
                    .set_dependency(&task_id, &depends_on, dep_type)
                    .await?;
                Ok(json!({
                    "success": true,
                    "taskId": task_id,
                    "dependsOnId": depends_on,
                    "type": dep_type.edge_type(),
                }))
            }
            "get_task_dependencies" => {
                let task_id = arg_str(&args, "get_task_dependencies", "taskId")?;
                let direction = match arg_opt_str(&args, "direction") {
                    Some(text) => {
                        text.parse::<Direction>()
                            .map_err(|e| McpError::InvalidParameters {
                                tool_name: "get_task_dependencies".to_string(),
                                message: e,
                            })?
                    }
                    None => Direction::Out,
                };
                let dependencies = self.service.get_dependencies(&task_id, direction).await?;
                Ok(json!({
                    "success": true,
                    "count": dependencies.len(),
                    "dependencies": dependencies,
                }))
            }
            other => Err(McpError::UnknownTool {
                tool_name: other.to_string(),
            }
            .into()),
        }
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let task_fields = || {
        json!({
            "title": { "type": "string" },
            "description": { "type": "string" },
            "priority": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
            "assignee": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } },
            "dueDate": { "type": "string" },
            "parentTaskId": { "type": "string" }
        })
    };

    registry.register(ToolDef::new(
        "create_task",
        "Create a task, optionally as a subtask of a parent.",
        json!({
            "type": "object",
            "properties": task_fields(),
            "required": ["title"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "add_subtask",
        "Create a subtask under an existing parent task.",
        json!({
            "type": "object",
            "properties": task_fields(),
            "required": ["title", "parentTaskId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_task",
        "Fetch a task, optionally with subtask summaries.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "includeSubtasks": { "type": "boolean" }
            },
            "required": ["taskId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "update_task",
        "Merge fields into a task; completing forces progress to 100.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "blocked", "deferred", "completed", "cancelled"]
                },
                "priority": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
                "assignee": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "dueDate": { "type": "string" },
                "progress": { "type": "integer", "minimum": 0, "maximum": 100 },
                "result": { "type": "string" }
            },
            "required": ["taskId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "complete_task",
        "Mark a task completed with an optional result.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "result": { "type": "string" }
            },
            "required": ["taskId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "delete_task",
        "Delete a task, optionally cascading to its subtasks.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "deleteSubtasks": { "type": "boolean" }
            },
            "required": ["taskId"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "list_tasks",
        "List tasks by status, priority, assignee, tags, or parent.",
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "blocked", "deferred", "completed", "cancelled"]
                },
                "priority": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
                "assignee": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "parentTaskId": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            },
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "set_task_dependency",
        "Record a typed dependency between two tasks.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "dependsOnId": { "type": "string" },
                "type": {
                    "type": "string",
                    "enum": ["MUST_COMPLETE_BEFORE", "SHOULD_COMPLETE_BEFORE", "BLOCKS"]
                }
            },
            "required": ["taskId", "dependsOnId", "type"],
            "additionalProperties": false
        }),
    ));

    registry.register(ToolDef::new(
        "get_task_dependencies",
        "List a task's typed dependencies in one direction.",
        json!({
            "type": "object",
            "properties": {
                "taskId": { "type": "string" },
                "direction": { "type": "string", "enum": ["in", "out", "both"] }
            },
            "required": ["taskId"],
            "additionalProperties": false
        }),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Deferred,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_priority_round_trip() {
        for priority in [
            TaskPriority::Critical,
            TaskPriority::High,
            TaskPriority::Medium,
            TaskPriority::Low,
        ] {
            let parsed: TaskPriority = priority.to_string().parse().unwrap();
            assert_eq!(parsed, priority);
        }
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_dependency_edge_types() {
        assert_eq!(
            DependencyType::MustCompleteBefore.edge_type(),
            "MUST_COMPLETE_BEFORE"
        );
        assert_eq!(
            "blocks".parse::<DependencyType>().unwrap(),
            DependencyType::Blocks
        );
        assert!("DEPENDS".parse::<DependencyType>().is_err());
    }

    #[test]
    fn test_registry_covers_task_surface() {
        let registry = build_registry();
        let names = registry.names();
        for expected in [
            "create_task",
            "add_subtask",
            "get_task",
            "update_task",
            "complete_task",
            "delete_task",
            "list_tasks",
            "set_task_dependency",
            "get_task_dependencies",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_add_subtask_requires_parent() {
        let registry = build_registry();
        let tool = registry.get("add_subtask").unwrap();
        let required = tool.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("parentTaskId")));
    }
}
