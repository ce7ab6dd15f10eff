//! Graph backend layer over the bolt driver.
//!
//! This module provides the read/write scope boundary every other component
//! goes through:
//! - `GraphStore`: pooled driver handle with per-call deadlines and a health probe
//! - `EntityOps`: (label, id)-keyed node CRUD with batch variants
//! - `RelationshipOps`: directed typed edges between existing entities
//! - `TraversalOps`: connected sets, paths, subgraphs, relationship stats, text search

mod entity;
mod relationship;
mod traversal;

pub use entity::EntityOps;
pub use relationship::{Direction, RelationshipOps, RelationshipView};
pub use traversal::{GraphPath, NodeSummary, RelStat, SubgraphView, TraversalOps};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use neo4rs::{
    query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType,
    Graph, Query, Row,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};

/// Outcome of a backend health probe.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Pooled handle to the graph backend.
///
/// The driver pools bolt connections internally; this wrapper adds the
/// acquisition deadline, error translation into the unified taxonomy, and the
/// read/write scoping all callers observe. No session handle ever escapes.
#[derive(Clone)]
pub struct GraphStore {
    graph: Arc<Graph>,
    acquisition_timeout: Duration,
}

impl GraphStore {
    /// Connect to the backend using the configured pool limits.
    pub async fn connect(config: &GraphConfig) -> GraphResult<Self> {
        let driver_config = neo4rs::ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_pool_size)
            .build()
            .map_err(|e| GraphError::Unavailable {
                message: format!("invalid driver config: {}", e),
            })?;

        let graph = Graph::connect(driver_config)
            .await
            .map_err(translate_driver)?;

        Ok(Self {
            graph: Arc::new(graph),
            acquisition_timeout: Duration::from_millis(config.acquisition_timeout_ms),
        })
    }

    /// Wrap an existing driver handle (tests, embedding callers).
    pub fn from_graph(graph: Arc<Graph>, acquisition_timeout: Duration) -> Self {
        Self {
            graph,
            acquisition_timeout,
        }
    }

    /// Execute a read query and collect all rows.
    pub async fn read(&self, q: Query) -> GraphResult<Vec<Row>> {
        self.collect_rows(q).await
    }

    /// Execute a mutation that returns no rows.
    pub async fn write(&self, q: Query) -> GraphResult<()> {
        self.with_deadline(self.graph.run(q)).await?.map_err(translate_driver)
    }

    /// Execute a mutation and read back its RETURN clause.
    pub async fn write_returning(&self, q: Query) -> GraphResult<Vec<Row>> {
        self.collect_rows(q).await
    }

    /// Run a batch of mutations in one explicit transaction.
    ///
    /// Commit only happens when every query succeeds; any failure rolls the
    /// whole batch back.
    pub async fn write_batch(&self, queries: Vec<Query>) -> GraphResult<()> {
        let mut txn = self
            .with_deadline(self.graph.start_txn())
            .await?
            .map_err(translate_driver)?;

        match self.with_deadline(txn.run_queries(queries)).await? {
            Ok(()) => self
                .with_deadline(txn.commit())
                .await?
                .map_err(translate_driver),
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(translate_driver(e))
            }
        }
    }

    /// Probe the backend with `RETURN 1` on a fresh session.
    pub async fn health(&self) -> HealthStatus {
        let start = Instant::now();
        let result = self.read(query("RETURN 1 AS ok")).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(rows) if !rows.is_empty() => HealthStatus {
                healthy: true,
                latency_ms,
                error: None,
            },
            Ok(_) => HealthStatus {
                healthy: false,
                latency_ms,
                error: Some("probe returned no rows".to_string()),
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }

    async fn collect_rows(&self, q: Query) -> GraphResult<Vec<Row>> {
        let mut stream = self
            .with_deadline(self.graph.execute(q))
            .await?
            .map_err(translate_driver)?;

        let mut rows = Vec::new();
        loop {
            match self.with_deadline(stream.next()).await? {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => return Err(translate_driver(e)),
            }
        }
        debug!(rows = rows.len(), "Graph query completed");
        Ok(rows)
    }

    async fn with_deadline<F, T>(&self, fut: F) -> GraphResult<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(self.acquisition_timeout, fut)
            .await
            .map_err(|_| GraphError::Timeout {
                timeout_ms: self.acquisition_timeout.as_millis() as u64,
            })
    }
}

fn translate_driver(e: neo4rs::Error) -> GraphError {
    match e {
        neo4rs::Error::ConnectionError => GraphError::Unavailable {
            message: "connection error".to_string(),
        },
        other => {
            let message = other.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("connection") || lowered.contains("refused") {
                GraphError::Unavailable { message }
            } else {
                GraphError::Driver(other)
            }
        }
    }
}

/// Validate a label or relationship type before it is interpolated into Cypher.
///
/// Identifiers must match `[A-Za-z_][A-Za-z0-9_]*`; everything else is
/// rejected so property-like input can never escape a backtick context.
pub(crate) fn validate_identifier(value: &str) -> GraphResult<()> {
    let mut chars = value.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if valid_head && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GraphError::InvalidIdentifier {
            value: value.to_string(),
            reason: "must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
        })
    }
}

/// Clamp a traversal depth into the driver-safe range before interpolation.
pub(crate) fn validate_depth(depth: u32, max: u32) -> GraphResult<u32> {
    if depth == 0 {
        return Err(GraphError::InvalidIdentifier {
            value: depth.to_string(),
            reason: "depth must be at least 1".to_string(),
        });
    }
    Ok(depth.min(max))
}

/// Convert a JSON object into a bolt property map.
///
/// Scalars and lists of scalars are supported; nested objects are rejected as
/// invalid input because node properties are flat in the data model.
pub(crate) fn json_to_bolt_map(props: &Map<String, Value>) -> GraphResult<BoltMap> {
    let mut map = BoltMap::default();
    for (key, value) in props {
        map.put(BoltString::new(key), json_to_bolt(key, value)?);
    }
    Ok(map)
}

fn json_to_bolt(key: &str, value: &Value) -> GraphResult<BoltType> {
    Ok(match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                BoltType::Integer(BoltInteger::new(i))
            } else if let Some(f) = n.as_f64() {
                BoltType::Float(BoltFloat::new(f))
            } else {
                return Err(GraphError::InvalidProperty {
                    key: key.to_string(),
                    reason: "number out of range".to_string(),
                });
            }
        }
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => {
            let mut list = BoltList::default();
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        return Err(GraphError::InvalidProperty {
                            key: key.to_string(),
                            reason: "lists may only contain scalars".to_string(),
                        });
                    }
                    scalar => list.push(json_to_bolt(key, scalar)?),
                }
            }
            BoltType::List(list)
        }
        Value::Object(_) => {
            return Err(GraphError::InvalidProperty {
                key: key.to_string(),
                reason: "nested objects are not valid node properties".to_string(),
            });
        }
    })
}

/// Convert a bolt value back into JSON.
pub(crate) fn bolt_to_json(value: BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => json!(i.value),
        BoltType::Float(f) => json!(f.value),
        BoltType::String(s) => Value::String(s.value),
        BoltType::List(list) => Value::Array(list.value.into_iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => {
            let mut out = Map::new();
            for (k, v) in map.value {
                out.insert(k.value, bolt_to_json(v));
            }
            Value::Object(out)
        }
        other => {
            warn!(value = ?other, "Dropping non-scalar bolt value during conversion");
            Value::Null
        }
    }
}

/// Extract the property map of a node as a JSON object.
pub(crate) fn node_to_props(node: &neo4rs::Node) -> Map<String, Value> {
    let mut props = Map::new();
    for key in node.keys() {
        if let Ok(value) = node.get::<BoltType>(key) {
            props.insert(key.to_string(), bolt_to_json(value));
        }
    }
    props
}

/// Extract the property map of a relationship as a JSON object.
pub(crate) fn relation_to_props(rel: &neo4rs::Relation) -> Map<String, Value> {
    let mut props = Map::new();
    for key in rel.keys() {
        if let Ok(value) = rel.get::<BoltType>(key) {
            props.insert(key.to_string(), bolt_to_json(value));
        }
    }
    props
}

/// Build the `SET` parameter map used by equality matching in `find`.
pub(crate) fn match_clause(alias: &str, props: &Map<String, Value>) -> GraphResult<(String, BoltMap)> {
    let mut conditions = Vec::new();
    let mut params = BoltMap::default();
    for (i, (key, value)) in props.iter().enumerate() {
        validate_identifier(key)?;
        let param_name = format!("match_{}", i);
        conditions.push(format!("{}.`{}` = ${}", alias, key, param_name));
        params.put(BoltString::new(&param_name), json_to_bolt(key, value)?);
    }
    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    Ok((clause, params))
}

/// Attach every entry of a bolt map to a query as parameters.
pub(crate) fn apply_params(mut q: Query, params: BoltMap) -> Query {
    let entries: HashMap<String, BoltType> =
        params.value.into_iter().map(|(k, v)| (k.value, v)).collect();
    for (key, value) in entries {
        q = q.param(&key, value);
    }
    q
}
