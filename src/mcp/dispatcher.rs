//! Transport-agnostic dispatcher for the four MCP operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use super::discovery::SubServerRegistry;
use super::sinks::{DispatchEvent, DispatchSink};
use super::{call_tool, ResourceContents, SubServer, ToolCallResult, ToolDef};
use crate::error::{ErrorKind, HubResult, McpError};
use crate::governance::{summarize_result, LogRecord, Omega};

/// Routes MCP operations to sub-servers under governance.
///
/// Re-entrant: concurrent calls share nothing but the registries and the
/// governance pipeline, so independent dispatches never serialize on each
/// other.
pub struct Dispatcher {
    servers: Vec<Arc<dyn SubServer>>,
    by_name: HashMap<String, Arc<dyn SubServer>>,
    discovery: Arc<SubServerRegistry>,
    omega: Arc<Omega>,
    sinks: Vec<Arc<dyn DispatchSink>>,
}

impl Dispatcher {
    /// Build a dispatcher over a governance pipeline.
    pub fn new(discovery: Arc<SubServerRegistry>, omega: Arc<Omega>) -> Self {
        Self {
            servers: Vec::new(),
            by_name: HashMap::new(),
            discovery,
            omega,
            sinks: Vec::new(),
        }
    }

    /// Register a sub-server and publish its tools to discovery.
    pub fn register_server(&mut self, server: Arc<dyn SubServer>) {
        self.discovery.register(
            server.name(),
            None,
            server.registry().names(),
            vec!["tools".to_string()],
        );
        self.by_name.insert(server.name().to_string(), server.clone());
        self.servers.push(server);
    }

    /// Attach a dispatch sink.
    pub fn add_sink(&mut self, sink: Arc<dyn DispatchSink>) {
        self.sinks.push(sink);
    }

    /// The discovery registry backing this dispatcher.
    pub fn discovery(&self) -> &Arc<SubServerRegistry> {
        &self.discovery
    }

    /// The governance pipeline wrapping every call.
    pub fn omega(&self) -> &Arc<Omega> {
        &self.omega
    }

    /// Registered sub-servers in registration order.
    pub fn servers(&self) -> &[Arc<dyn SubServer>] {
        &self.servers
    }

    /// `tools/list`: every tool across sub-servers in registration order.
    pub fn list_tools(&self) -> Vec<ToolDef> {
        self.servers
            .iter()
            .flat_map(|s| s.registry().list().to_vec())
            .collect()
    }

    /// `tools/call`: the full governed pipeline.
    ///
    /// `server` may name a sub-server explicitly; otherwise the tool is
    /// routed through discovery. Tool names of the form `<server>.<tool>`
    /// are split first.
    pub async fn call_tool(
        &self,
        server: Option<&str>,
        tool: &str,
        args: Value,
    ) -> ToolCallResult {
        let (server, tool) = match server {
            Some(name) => (name.to_string(), tool.to_string()),
            None => match tool.split_once('.') {
                Some((server, bare)) if self.by_name.contains_key(server) => {
                    (server.to_string(), bare.to_string())
                }
                _ => match self.discovery.route_tool(tool) {
                    Some(name) => (name, tool.to_string()),
                    None => {
                        return ToolCallResult::failure_with_kind(
                            tool,
                            ErrorKind::NotFound,
                            &format!("tool not found: {}", tool),
                        )
                    }
                },
            },
        };

        let Some(target) = self.by_name.get(&server) else {
            return ToolCallResult::failure_with_kind(
                &tool,
                ErrorKind::NotFound,
                &format!("unknown sub-server: {}", server),
            );
        };

        let start = Instant::now();
        let record = LogRecord::tool_call(
            &server,
            &tool,
            json!({ "context": { "arguments": args.clone() } }),
        );

        // Pre-record gates the action: nothing runs unless the record lands.
        if let Err(e) = self.omega.pre_action(&record).await {
            let result = ToolCallResult::failure_with_kind(&tool, e.kind(), &e.to_string());
            self.notify(&server, &tool, start, true);
            return result;
        }

        let result = call_tool(target.as_ref(), &tool, args).await;

        let summary = summarize_result(result.is_error(), result.text().unwrap_or_default());
        if let Err(e) = self.omega.post_action(&record, summary).await {
            warn!(tool = %tool, error = %e, "Post-verification record failed");
        }

        self.notify(&server, &tool, start, result.is_error());
        result
    }

    /// `resources/list` across all sub-servers.
    pub async fn list_resources(&self) -> Vec<super::ResourceDef> {
        let mut resources = Vec::new();
        for server in &self.servers {
            resources.extend(server.list_resources().await);
        }
        resources
    }

    /// `resources/read`: first sub-server claiming the URI wins.
    pub async fn read_resource(&self, uri: &str) -> HubResult<ResourceContents> {
        for server in &self.servers {
            let owns = server
                .list_resources()
                .await
                .iter()
                .any(|r| r.uri == uri);
            if owns {
                return server.read_resource(uri).await;
            }
        }
        Err(McpError::UnknownResource {
            uri: uri.to_string(),
        }
        .into())
    }

    fn notify(&self, server: &str, tool: &str, start: Instant, is_error: bool) {
        let event = DispatchEvent {
            server: server.to_string(),
            tool: tool.to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            is_error,
        };
        for sink in &self.sinks {
            sink.on_dispatch(&event);
        }
    }
}
