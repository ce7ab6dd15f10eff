//! Entity operations: (label, id)-keyed node CRUD.

use chrono::{SecondsFormat, Utc};
use neo4rs::{query, BoltType, Node};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    apply_params, json_to_bolt_map, match_clause, node_to_props, validate_identifier, GraphStore,
};
use crate::error::{GraphError, GraphResult};

/// Node CRUD scoped by label.
///
/// Every mutation stamps `created_at`/`updated_at` as RFC-3339 UTC strings;
/// `created_at` is written once and never refreshed.
#[derive(Clone)]
pub struct EntityOps {
    store: GraphStore,
}

impl EntityOps {
    /// Create entity ops over a store handle.
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Create a node; fails with `Duplicate` when (label, id) already exists.
    pub async fn create(
        &self,
        label: &str,
        props: Map<String, Value>,
    ) -> GraphResult<Map<String, Value>> {
        validate_identifier(label)?;
        let id = require_id(&props)?;
        let props = stamp_new(props);

        let q = query(&format!(
            "OPTIONAL MATCH (existing:`{label}` {{id: $id}}) \
             WITH existing WHERE existing IS NULL \
             CREATE (n:`{label}`) SET n = $props \
             RETURN n"
        ))
        .param("id", id.as_str())
        .param("props", BoltType::Map(json_to_bolt_map(&props)?));

        let rows = self.store.write_returning(q).await?;
        match rows.first() {
            Some(row) => {
                let node: Node = row.get("n").map_err(row_error)?;
                debug!(label = %label, id = %id, "Entity created");
                Ok(node_to_props(&node))
            }
            None => Err(GraphError::Duplicate {
                label: label.to_string(),
                id,
            }),
        }
    }

    /// Create several nodes of one label atomically.
    ///
    /// Any failure rolls back the whole batch, including duplicates detected
    /// by the per-node guard.
    pub async fn create_batch(
        &self,
        label: &str,
        batch: Vec<Map<String, Value>>,
    ) -> GraphResult<usize> {
        validate_identifier(label)?;
        let mut queries = Vec::with_capacity(batch.len());
        for props in &batch {
            let id = require_id(props)?;
            let props = stamp_new(props.clone());
            // A duplicate makes the CREATE fail the whole transaction via the
            // division guard rather than silently skipping the node.
            let q = query(&format!(
                "OPTIONAL MATCH (existing:`{label}` {{id: $id}}) \
                 WITH 1 / CASE WHEN existing IS NULL THEN 1 ELSE 0 END AS guard \
                 CREATE (n:`{label}`) SET n = $props"
            ))
            .param("id", id.as_str())
            .param("props", BoltType::Map(json_to_bolt_map(&props)?));
            queries.push(q);
        }

        let count = queries.len();
        self.store.write_batch(queries).await?;
        debug!(label = %label, count, "Entity batch created");
        Ok(count)
    }

    /// Fetch a node's properties, or `None` when absent.
    pub async fn get(&self, label: &str, id: &str) -> GraphResult<Option<Map<String, Value>>> {
        validate_identifier(label)?;
        let q = query(&format!("MATCH (n:`{label}` {{id: $id}}) RETURN n")).param("id", id);

        let rows = self.store.read(q).await?;
        match rows.first() {
            Some(row) => {
                let node: Node = row.get("n").map_err(row_error)?;
                Ok(Some(node_to_props(&node)))
            }
            None => Ok(None),
        }
    }

    /// Find up to `limit` nodes whose properties equal `match_props`.
    ///
    /// Results come back newest-first by `created_at`.
    pub async fn find(
        &self,
        label: &str,
        match_props: &Map<String, Value>,
        limit: usize,
    ) -> GraphResult<Vec<Map<String, Value>>> {
        validate_identifier(label)?;
        let (clause, params) = match_clause("n", match_props)?;
        let q = query(&format!(
            "MATCH (n:`{label}`) {clause} \
             RETURN n ORDER BY n.created_at DESC LIMIT $limit"
        ))
        .param("limit", limit as i64);

        let rows = self.store.read(apply_params(q, params)).await?;
        rows.iter()
            .map(|row| {
                let node: Node = row.get("n").map_err(row_error)?;
                Ok(node_to_props(&node))
            })
            .collect()
    }

    /// Merge properties into an existing node; fails `NotFound` when absent.
    pub async fn update(
        &self,
        label: &str,
        id: &str,
        props: Map<String, Value>,
    ) -> GraphResult<Map<String, Value>> {
        validate_identifier(label)?;
        let mut props = props;
        // created_at is immutable once persisted
        props.remove("created_at");
        props.insert("updated_at".to_string(), Value::String(now_string()));
        props.remove("id");

        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}}) SET n += $props RETURN n"
        ))
        .param("id", id)
        .param("props", BoltType::Map(json_to_bolt_map(&props)?));

        let rows = self.store.write_returning(q).await?;
        match rows.first() {
            Some(row) => {
                let node: Node = row.get("n").map_err(row_error)?;
                debug!(label = %label, id = %id, "Entity updated");
                Ok(node_to_props(&node))
            }
            None => Err(GraphError::NodeNotFound {
                label: label.to_string(),
                id: id.to_string(),
            }),
        }
    }

    /// Detach-delete a node; returns whether anything was removed.
    pub async fn delete(&self, label: &str, id: &str) -> GraphResult<bool> {
        validate_identifier(label)?;
        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}}) \
             WITH n DETACH DELETE n RETURN count(*) AS deleted"
        ))
        .param("id", id);

        let rows = self.store.write_returning(q).await?;
        let deleted: i64 = rows
            .first()
            .map(|row| row.get("deleted").map_err(row_error))
            .transpose()?
            .unwrap_or(0);
        debug!(label = %label, id = %id, deleted, "Entity delete");
        Ok(deleted > 0)
    }

    /// Count nodes carrying a label.
    pub async fn count(&self, label: &str) -> GraphResult<i64> {
        validate_identifier(label)?;
        let q = query(&format!("MATCH (n:`{label}`) RETURN count(n) AS count"));
        let rows = self.store.read(q).await?;
        rows.first()
            .map(|row| row.get("count").map_err(row_error))
            .transpose()
            .map(|c| c.unwrap_or(0))
    }

    /// Distinct labels in the store with node counts, largest first.
    pub async fn list_labels(&self) -> GraphResult<Vec<(String, i64)>> {
        let q = query(
            "MATCH (n) UNWIND labels(n) AS label \
             RETURN label, count(*) AS count ORDER BY count DESC, label ASC",
        );
        let rows = self.store.read(q).await?;
        rows.iter()
            .map(|row| {
                let label: String = row.get("label").map_err(row_error)?;
                let count: i64 = row.get("count").map_err(row_error)?;
                Ok((label, count))
            })
            .collect()
    }
}

pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn row_error<E: std::fmt::Display>(e: E) -> GraphError {
    GraphError::Query {
        message: format!("row decode failed: {}", e),
    }
}

fn require_id(props: &Map<String, Value>) -> GraphResult<String> {
    match props.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        _ => Err(GraphError::InvalidProperty {
            key: "id".to_string(),
            reason: "a non-empty string id is required".to_string(),
        }),
    }
}

fn stamp_new(mut props: Map<String, Value>) -> Map<String, Value> {
    let now = now_string();
    props
        .entry("created_at".to_string())
        .or_insert_with(|| Value::String(now.clone()));
    props
        .entry("updated_at".to_string())
        .or_insert_with(|| Value::String(now));
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props_with_id(id: &str) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".to_string(), json!(id));
        props
    }

    #[test]
    fn test_require_id() {
        assert_eq!(require_id(&props_with_id("p1")).unwrap(), "p1");

        let mut missing = Map::new();
        missing.insert("name".to_string(), json!("Alice"));
        assert!(require_id(&missing).is_err());

        let mut blank = Map::new();
        blank.insert("id".to_string(), json!("  "));
        assert!(require_id(&blank).is_err());

        let mut numeric = Map::new();
        numeric.insert("id".to_string(), json!(7));
        assert!(require_id(&numeric).is_err());
    }

    #[test]
    fn test_stamp_new_sets_timestamps() {
        let stamped = stamp_new(props_with_id("p1"));
        assert!(stamped.contains_key("created_at"));
        assert!(stamped.contains_key("updated_at"));
        assert_eq!(stamped["created_at"], stamped["updated_at"]);
    }

    #[test]
    fn test_stamp_new_preserves_existing_created_at() {
        let mut props = props_with_id("p1");
        props.insert("created_at".to_string(), json!("2024-01-01T00:00:00.000Z"));
        let stamped = stamp_new(props);
        assert_eq!(stamped["created_at"], json!("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_now_string_is_strict_utc() {
        let now = now_string();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
