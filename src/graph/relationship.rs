//! Relationship operations: directed typed edges between existing entities.

use neo4rs::{query, BoltType, Node, Relation};
use serde_json::{Map, Value};
use tracing::debug;

use super::entity::{now_string, row_error};
use super::{json_to_bolt_map, node_to_props, relation_to_props, validate_identifier, GraphStore};
use crate::error::{GraphError, GraphResult};

/// Edge direction relative to the anchoring node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

impl Direction {
    fn pattern(&self, rel: &str) -> String {
        match self {
            Direction::Out => format!("-[{rel}]->"),
            Direction::In => format!("<-[{rel}]-"),
            Direction::Both => format!("-[{rel}]-"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// One edge seen from an anchoring node.
#[derive(Debug, Clone)]
pub struct RelationshipView {
    pub rel_type: String,
    pub properties: Map<String, Value>,
    pub other: Map<String, Value>,
    pub other_labels: Vec<String>,
}

/// Directed edge CRUD between (label, id)-addressed endpoints.
#[derive(Clone)]
pub struct RelationshipOps {
    store: GraphStore,
}

impl RelationshipOps {
    /// Create relationship ops over a store handle.
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Create an edge; both endpoints must already exist.
    pub async fn create(
        &self,
        from: (&str, &str),
        rel_type: &str,
        to: (&str, &str),
        props: Option<Map<String, Value>>,
    ) -> GraphResult<Map<String, Value>> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        validate_identifier(rel_type)?;

        let mut props = props.unwrap_or_default();
        props
            .entry("created_at".to_string())
            .or_insert_with(|| Value::String(now_string()));

        let q = query(&format!(
            "MATCH (a:`{from_label}` {{id: $from_id}}), (b:`{to_label}` {{id: $to_id}}) \
             CREATE (a)-[r:`{rel_type}`]->(b) SET r = $props \
             RETURN r"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id)
        .param("props", BoltType::Map(json_to_bolt_map(&props)?));

        let rows = self.store.write_returning(q).await?;
        match rows.first() {
            Some(row) => {
                let rel: Relation = row.get("r").map_err(row_error)?;
                debug!(
                    rel_type = %rel_type,
                    from = %format!("{}:{}", from_label, from_id),
                    to = %format!("{}:{}", to_label, to_id),
                    "Relationship created"
                );
                Ok(relation_to_props(&rel))
            }
            None => Err(GraphError::NodeNotFound {
                label: format!("{} or {}", from_label, to_label),
                id: format!("{} or {}", from_id, to_id),
            }),
        }
    }

    /// Edges attached to one node, with the far endpoint and its labels.
    ///
    /// No ordering is guaranteed.
    pub async fn get_for(
        &self,
        label: &str,
        id: &str,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> GraphResult<Vec<RelationshipView>> {
        validate_identifier(label)?;
        let rel_fragment = match rel_type {
            Some(t) => {
                validate_identifier(t)?;
                format!("r:`{}`", t)
            }
            None => "r".to_string(),
        };

        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}}){}(m) \
             RETURN r, type(r) AS rel_type, m, labels(m) AS other_labels",
            direction.pattern(&rel_fragment)
        ))
        .param("id", id);

        let rows = self.store.read(q).await?;
        rows.iter()
            .map(|row| {
                let rel: Relation = row.get("r").map_err(row_error)?;
                let rel_type: String = row.get("rel_type").map_err(row_error)?;
                let other: Node = row.get("m").map_err(row_error)?;
                let other_labels: Vec<String> = row.get("other_labels").map_err(row_error)?;
                Ok(RelationshipView {
                    rel_type,
                    properties: relation_to_props(&rel),
                    other: node_to_props(&other),
                    other_labels,
                })
            })
            .collect()
    }

    /// The unique edge between two endpoints, if present.
    pub async fn find(
        &self,
        from: (&str, &str),
        rel_type: &str,
        to: (&str, &str),
    ) -> GraphResult<Option<Map<String, Value>>> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        validate_identifier(rel_type)?;

        let q = query(&format!(
            "MATCH (a:`{from_label}` {{id: $from_id}})-[r:`{rel_type}`]->(b:`{to_label}` {{id: $to_id}}) \
             RETURN r LIMIT 1"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id);

        let rows = self.store.read(q).await?;
        match rows.first() {
            Some(row) => {
                let rel: Relation = row.get("r").map_err(row_error)?;
                Ok(Some(relation_to_props(&rel)))
            }
            None => Ok(None),
        }
    }

    /// Merge properties into an existing edge.
    pub async fn update(
        &self,
        from: (&str, &str),
        rel_type: &str,
        to: (&str, &str),
        props: Map<String, Value>,
    ) -> GraphResult<Map<String, Value>> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        validate_identifier(rel_type)?;

        let mut props = props;
        props.remove("created_at");

        let q = query(&format!(
            "MATCH (a:`{from_label}` {{id: $from_id}})-[r:`{rel_type}`]->(b:`{to_label}` {{id: $to_id}}) \
             SET r += $props RETURN r"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id)
        .param("props", BoltType::Map(json_to_bolt_map(&props)?));

        let rows = self.store.write_returning(q).await?;
        match rows.first() {
            Some(row) => {
                let rel: Relation = row.get("r").map_err(row_error)?;
                Ok(relation_to_props(&rel))
            }
            None => Err(GraphError::RelationshipNotFound {
                rel_type: rel_type.to_string(),
            }),
        }
    }

    /// Delete one edge; returns whether anything was removed.
    pub async fn delete(
        &self,
        from: (&str, &str),
        rel_type: &str,
        to: (&str, &str),
    ) -> GraphResult<bool> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        validate_identifier(rel_type)?;

        let q = query(&format!(
            "MATCH (a:`{from_label}` {{id: $from_id}})-[r:`{rel_type}`]->(b:`{to_label}` {{id: $to_id}}) \
             WITH r DELETE r RETURN count(*) AS deleted"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id);

        let rows = self.store.write_returning(q).await?;
        let deleted: i64 = rows
            .first()
            .map(|row| row.get("deleted").map_err(row_error))
            .transpose()?
            .unwrap_or(0);
        Ok(deleted > 0)
    }

    /// Delete every edge attached to one node; returns how many were removed.
    pub async fn delete_all_for(&self, label: &str, id: &str) -> GraphResult<i64> {
        validate_identifier(label)?;
        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}})-[r]-() \
             WITH r DELETE r RETURN count(*) AS deleted"
        ))
        .param("id", id);

        let rows = self.store.write_returning(q).await?;
        rows.first()
            .map(|row| row.get("deleted").map_err(row_error))
            .transpose()
            .map(|c| c.unwrap_or(0))
    }

    /// Count edges attached to one node, optionally filtered by type.
    pub async fn count_for(
        &self,
        label: &str,
        id: &str,
        rel_type: Option<&str>,
    ) -> GraphResult<i64> {
        validate_identifier(label)?;
        let rel_fragment = match rel_type {
            Some(t) => {
                validate_identifier(t)?;
                format!("r:`{}`", t)
            }
            None => "r".to_string(),
        };

        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}})-[{rel_fragment}]-() RETURN count(r) AS count"
        ))
        .param("id", id);

        let rows = self.store.read(q).await?;
        rows.first()
            .map(|row| row.get("count").map_err(row_error))
            .transpose()
            .map(|c| c.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_patterns() {
        assert_eq!(Direction::Out.pattern("r"), "-[r]->");
        assert_eq!(Direction::In.pattern("r"), "<-[r]-");
        assert_eq!(Direction::Both.pattern("r"), "-[r]-");
        assert_eq!(Direction::Out.pattern("r:`KNOWS`"), "-[r:`KNOWS`]->");
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("in".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!("OUT".parse::<Direction>().unwrap(), Direction::Out);
        assert_eq!("Both".parse::<Direction>().unwrap(), Direction::Both);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
