use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Graph backend errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Duplicate node: ({label}, {id}) already exists")]
    Duplicate { label: String, id: String },

    #[error("Node not found: ({label}, {id})")]
    NodeNotFound { label: String, id: String },

    #[error("Relationship not found: {rel_type}")]
    RelationshipNotFound { rel_type: String },

    #[error("Invalid identifier: {value} ({reason})")]
    InvalidIdentifier { value: String, reason: String },

    #[error("Unsupported property value for {key}: {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error("Graph operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Driver error: {0}")]
    Driver(#[from] neo4rs::Error),
}

/// Notebook vault errors
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Note not found: {name}")]
    NotFound { name: String },

    #[error("Invalid note name: {name} ({reason})")]
    InvalidName { name: String, reason: String },

    #[error("Vault root unavailable: {path}: {message}")]
    RootUnavailable { path: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frontmatter in {name}: {message}")]
    Frontmatter { name: String, message: String },
}

/// Model runtime errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model runtime unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("Model not found: {model}")]
    NotFound { model: String },

    #[error("Runtime API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid runtime response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Governance pipeline errors
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Action blocked by governance: {reason}")]
    Blocked { reason: String },

    #[error("Log record failed validation: {field} - {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Log write failed: {message}")]
    WriteFailed { message: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Unknown sub-server: {server}")]
    UnknownServer { server: String },

    #[error("Unknown resource: {uri}")]
    UnknownResource { uri: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unified failure classification for every operation in the hub.
///
/// Every error bottoms out in exactly one kind; transports use the kind to
/// pick status codes and clients use it to decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Duplicate,
    BackendUnavailable,
    Timeout,
    GovernanceBlocked,
    GovernanceInvalidFormat,
    Internal,
}

impl ErrorKind {
    /// Stable wire name for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::GovernanceBlocked => "governance_blocked",
            ErrorKind::GovernanceInvalidFormat => "governance_invalid_format",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status code an embedding transport should answer with.
    ///
    /// Kinds without a dedicated status fall through to 500.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::GovernanceBlocked => 423,
            ErrorKind::BackendUnavailable | ErrorKind::Timeout => 503,
            ErrorKind::Duplicate | ErrorKind::GovernanceInvalidFormat | ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HubError {
    /// Classify this error into the unified taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Config { .. } => ErrorKind::Internal,
            HubError::Graph(e) => e.kind(),
            HubError::Vault(e) => e.kind(),
            HubError::Model(e) => e.kind(),
            HubError::Governance(e) => e.kind(),
            HubError::Mcp(e) => e.kind(),
            HubError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl GraphError {
    /// Taxonomy kind for this graph error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Unavailable { .. } => ErrorKind::BackendUnavailable,
            GraphError::Duplicate { .. } => ErrorKind::Duplicate,
            GraphError::NodeNotFound { .. } | GraphError::RelationshipNotFound { .. } => {
                ErrorKind::NotFound
            }
            GraphError::InvalidIdentifier { .. } | GraphError::InvalidProperty { .. } => {
                ErrorKind::InvalidInput
            }
            GraphError::Timeout { .. } => ErrorKind::Timeout,
            GraphError::Query { .. } | GraphError::Driver(_) => ErrorKind::Internal,
        }
    }
}

impl VaultError {
    /// Taxonomy kind for this vault error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotFound { .. } => ErrorKind::NotFound,
            VaultError::InvalidName { .. } => ErrorKind::InvalidInput,
            VaultError::RootUnavailable { .. } => ErrorKind::BackendUnavailable,
            VaultError::Io { .. } => ErrorKind::Internal,
            VaultError::Frontmatter { .. } => ErrorKind::Internal,
        }
    }
}

impl ModelError {
    /// Taxonomy kind for this model error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::Unavailable { .. } => ErrorKind::BackendUnavailable,
            ModelError::NotFound { .. } => ErrorKind::NotFound,
            ModelError::Timeout { .. } => ErrorKind::Timeout,
            ModelError::Api { .. } | ModelError::InvalidResponse { .. } | ModelError::Http(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Only transport-level failures qualify; API rejections and decode
    /// failures are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Timeout { .. } => true,
            ModelError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

impl GovernanceError {
    /// Taxonomy kind for this governance error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::Blocked { .. } => ErrorKind::GovernanceBlocked,
            GovernanceError::InvalidFormat { .. } => ErrorKind::GovernanceInvalidFormat,
            GovernanceError::WriteFailed { .. } => ErrorKind::BackendUnavailable,
        }
    }
}

impl McpError {
    /// Taxonomy kind for this MCP error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::InvalidRequest { .. } | McpError::InvalidParameters { .. } => {
                ErrorKind::InvalidInput
            }
            McpError::UnknownTool { .. }
            | McpError::UnknownServer { .. }
            | McpError::UnknownResource { .. } => ErrorKind::NotFound,
            McpError::ExecutionFailed { .. } | McpError::Json(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for application errors
pub type HubResult<T> = Result<T, HubError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_display() {
        let err = HubError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = HubError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::Duplicate {
            label: "Person".to_string(),
            id: "p1".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate node: (Person, p1) already exists");

        let err = GraphError::NodeNotFound {
            label: "Person".to_string(),
            id: "p2".to_string(),
        };
        assert_eq!(err.to_string(), "Node not found: (Person, p2)");

        let err = GraphError::Timeout { timeout_ms: 60000 };
        assert_eq!(err.to_string(), "Graph operation timed out after 60000ms");
    }

    #[test]
    fn test_graph_error_kinds() {
        assert_eq!(
            GraphError::Unavailable {
                message: "refused".into()
            }
            .kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            GraphError::Duplicate {
                label: "A".into(),
                id: "1".into()
            }
            .kind(),
            ErrorKind::Duplicate
        );
        assert_eq!(
            GraphError::NodeNotFound {
                label: "A".into(),
                id: "1".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(GraphError::Timeout { timeout_ms: 1 }.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_governance_error_kinds() {
        assert_eq!(
            GovernanceError::Blocked {
                reason: "vault unwritable".into()
            }
            .kind(),
            ErrorKind::GovernanceBlocked
        );
        assert_eq!(
            GovernanceError::InvalidFormat {
                field: "timestamp".into(),
                reason: "not UTC".into()
            }
            .kind(),
            ErrorKind::GovernanceInvalidFormat
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::InvalidInput.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::GovernanceBlocked.http_status(), 423);
        assert_eq!(ErrorKind::BackendUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 503);
        // kinds without a dedicated status all answer 500
        assert_eq!(ErrorKind::Duplicate.http_status(), 500);
        assert_eq!(ErrorKind::GovernanceInvalidFormat.http_status(), 500);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn test_model_error_retryable() {
        assert!(ModelError::Timeout { timeout_ms: 1000 }.is_retryable());
        assert!(!ModelError::Api {
            status: 404,
            message: "no such model".into()
        }
        .is_retryable());
        assert!(!ModelError::InvalidResponse {
            message: "bad json".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_layer_error_conversion() {
        let graph_err = GraphError::NodeNotFound {
            label: "Task".into(),
            id: "t1".into(),
        };
        let hub_err: HubError = graph_err.into();
        assert!(matches!(hub_err, HubError::Graph(_)));
        assert_eq!(hub_err.kind(), ErrorKind::NotFound);

        let gov_err = GovernanceError::Blocked {
            reason: "pre-check failed".into(),
        };
        let hub_err: HubError = gov_err.into();
        assert_eq!(hub_err.kind(), ErrorKind::GovernanceBlocked);
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(ErrorKind::GovernanceBlocked.as_str(), "governance_blocked");
        assert_eq!(ErrorKind::BackendUnavailable.to_string(), "backend_unavailable");
    }
}
