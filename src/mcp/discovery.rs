//! Sub-server discovery registry.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use crate::governance::now_timestamp;

/// Health of a registered sub-server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Unhealthy,
    Unknown,
}

/// One discovery entry.
#[derive(Debug, Clone, Serialize)]
pub struct SubServerEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub tools: Vec<String>,
    pub capabilities: Vec<String>,
    pub status: ServerStatus,
    pub registered_at: String,
}

/// Process-wide registry mapping sub-server names to their tool surfaces.
///
/// Mutations are rare; the whole table sits behind one mutex and lookups
/// clone out of it. Routing is deterministic: first registration wins.
#[derive(Default)]
pub struct SubServerRegistry {
    entries: Mutex<Vec<SubServerEntry>>,
}

impl SubServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sub-server; idempotent on name collision.
    pub fn register(
        &self,
        name: &str,
        endpoint: Option<String>,
        tools: Vec<String>,
        capabilities: Vec<String>,
    ) -> SubServerEntry {
        let mut entries = self.entries.lock().expect("discovery registry poisoned");
        if let Some(existing) = entries.iter().find(|e| e.name == name) {
            warn!(server = %name, "Sub-server already registered, keeping existing entry");
            return existing.clone();
        }

        let entry = SubServerEntry {
            name: name.to_string(),
            endpoint,
            tools,
            capabilities,
            status: ServerStatus::Active,
            registered_at: now_timestamp(),
        };
        info!(server = %name, tools = entry.tools.len(), "Sub-server registered");
        entries.push(entry.clone());
        entry
    }

    /// Remove a sub-server; returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().expect("discovery registry poisoned");
        let before = entries.len();
        entries.retain(|e| e.name != name);
        before != entries.len()
    }

    /// All registered entries in registration order.
    pub fn list(&self) -> Vec<SubServerEntry> {
        self.entries
            .lock()
            .expect("discovery registry poisoned")
            .clone()
    }

    /// Flatten every tool with its owning sub-server.
    pub fn discover_tools(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .expect("discovery registry poisoned")
            .iter()
            .flat_map(|e| {
                e.tools
                    .iter()
                    .map(|t| (t.clone(), e.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// First sub-server offering a tool, in registration order.
    pub fn route_tool(&self, tool: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("discovery registry poisoned")
            .iter()
            .find(|e| e.tools.iter().any(|t| t == tool))
            .map(|e| e.name.clone())
    }

    /// Update a sub-server's probed status.
    pub fn set_status(&self, name: &str, status: ServerStatus) {
        let mut entries = self.entries.lock().expect("discovery registry poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_two() -> SubServerRegistry {
        let registry = SubServerRegistry::new();
        registry.register(
            "graph-memory",
            None,
            vec!["create_entity".into(), "get_entity".into()],
            vec!["tools".into()],
        );
        registry.register(
            "tasks",
            None,
            vec!["create_task".into(), "get_entity".into()],
            vec!["tools".into()],
        );
        registry
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = registry_with_two();
        let entry = registry.register("graph-memory", None, vec!["other".into()], vec![]);
        // the original tool list survives
        assert_eq!(entry.tools.len(), 2);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_route_tool_deterministic_by_registration_order() {
        let registry = registry_with_two();
        // both servers offer get_entity; the first registered wins
        assert_eq!(registry.route_tool("get_entity").unwrap(), "graph-memory");
        assert_eq!(registry.route_tool("create_task").unwrap(), "tasks");
        assert!(registry.route_tool("unknown").is_none());
    }

    #[test]
    fn test_discover_tools_flattens_with_owner() {
        let registry = registry_with_two();
        let tools = registry.discover_tools();
        assert_eq!(tools.len(), 4);
        assert!(tools.contains(&("create_task".to_string(), "tasks".to_string())));
    }

    #[test]
    fn test_unregister() {
        let registry = registry_with_two();
        assert!(registry.unregister("tasks"));
        assert!(!registry.unregister("tasks"));
        assert!(registry.route_tool("create_task").is_none());
    }

    #[test]
    fn test_set_status() {
        let registry = registry_with_two();
        registry.set_status("tasks", ServerStatus::Unhealthy);
        let entry = registry
            .list()
            .into_iter()
            .find(|e| e.name == "tasks")
            .unwrap();
        assert_eq!(entry.status, ServerStatus::Unhealthy);
    }
}
