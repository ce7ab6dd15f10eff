//! Traversal operations: reachability, paths, subgraphs, and text search.

use neo4rs::{query, BoltType, Node};
use serde_json::{Map, Value};

use super::entity::row_error;
use super::{bolt_to_json, node_to_props, validate_depth, validate_identifier, GraphStore};
use crate::error::{GraphError, GraphResult};

/// Hard ceiling on traversal depth regardless of caller input.
const MAX_DEPTH: u32 = 10;
/// Cap on nodes returned by connected-set and subgraph queries.
const DEFAULT_NODE_CAP: usize = 500;

/// Compact node identity used in path and subgraph results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A path between two entities.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphPath {
    pub length: usize,
    pub nodes: Vec<NodeSummary>,
    pub relationships: Vec<String>,
}

/// Edge inside a subgraph view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubgraphEdge {
    pub from_id: String,
    pub to_id: String,
    pub rel_type: String,
}

/// Nodes within a radius of a center plus the edges among them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubgraphView {
    pub nodes: Vec<Map<String, Value>>,
    pub edges: Vec<SubgraphEdge>,
}

/// Relationship statistics grouped by type and neighbor label.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelStat {
    pub rel_type: String,
    pub neighbor_label: String,
    pub count: i64,
}

/// Pattern traversal over the entity graph.
#[derive(Clone)]
pub struct TraversalOps {
    store: GraphStore,
}

impl TraversalOps {
    /// Create traversal ops over a store handle.
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Distinct nodes reachable within `max_depth` steps over any edge.
    pub async fn connected(
        &self,
        label: &str,
        id: &str,
        max_depth: u32,
    ) -> GraphResult<Vec<Map<String, Value>>> {
        validate_identifier(label)?;
        let depth = validate_depth(max_depth, MAX_DEPTH)?;

        let q = query(&format!(
            "MATCH (start:`{label}` {{id: $id}})-[*1..{depth}]-(m) \
             RETURN DISTINCT m LIMIT {DEFAULT_NODE_CAP}"
        ))
        .param("id", id);

        let rows = self.store.read(q).await?;
        rows.iter()
            .map(|row| {
                let node: Node = row.get("m").map_err(row_error)?;
                Ok(node_to_props(&node))
            })
            .collect()
    }

    /// Shortest path between two entities, or `None` when unreachable within
    /// the depth bound.
    pub async fn shortest_path(
        &self,
        from: (&str, &str),
        to: (&str, &str),
        max_depth: u32,
    ) -> GraphResult<Option<GraphPath>> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        let depth = validate_depth(max_depth, MAX_DEPTH)?;

        let q = query(&format!(
            "MATCH (a:`{from_label}` {{id: $from_id}}), (b:`{to_label}` {{id: $to_id}}), \
             p = shortestPath((a)-[*..{depth}]-(b)) \
             RETURN length(p) AS len, \
                    [n IN nodes(p) | {{id: n.id, labels: labels(n), name: n.name}}] AS nodes, \
                    [r IN relationships(p) | type(r)] AS rels"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id);

        let rows = self.store.read(q).await?;
        rows.first().map(parse_path_row).transpose()
    }

    /// All paths between two entities ordered by length, up to `limit`.
    pub async fn all_paths(
        &self,
        from: (&str, &str),
        to: (&str, &str),
        max_depth: u32,
        limit: usize,
    ) -> GraphResult<Vec<GraphPath>> {
        let (from_label, from_id) = from;
        let (to_label, to_id) = to;
        validate_identifier(from_label)?;
        validate_identifier(to_label)?;
        let depth = validate_depth(max_depth, MAX_DEPTH)?;

        let q = query(&format!(
            "MATCH p = (a:`{from_label}` {{id: $from_id}})-[*..{depth}]-(b:`{to_label}` {{id: $to_id}}) \
             RETURN length(p) AS len, \
                    [n IN nodes(p) | {{id: n.id, labels: labels(n), name: n.name}}] AS nodes, \
                    [r IN relationships(p) | type(r)] AS rels \
             ORDER BY len ASC LIMIT $limit"
        ))
        .param("from_id", from_id)
        .param("to_id", to_id)
        .param("limit", limit as i64);

        let rows = self.store.read(q).await?;
        rows.iter().map(parse_path_row).collect()
    }

    /// Nodes within `radius` of a center plus the edges among them.
    pub async fn subgraph(
        &self,
        label: &str,
        id: &str,
        radius: u32,
        node_cap: usize,
    ) -> GraphResult<SubgraphView> {
        validate_identifier(label)?;
        let depth = validate_depth(radius, MAX_DEPTH)?;
        let cap = node_cap.clamp(1, DEFAULT_NODE_CAP);

        let q = query(&format!(
            "MATCH (c:`{label}` {{id: $id}}) \
             OPTIONAL MATCH (c)-[*1..{depth}]-(m) \
             WITH c, collect(DISTINCT m)[0..{cap}] AS others \
             WITH [c] + others AS ns \
             UNWIND ns AS a \
             OPTIONAL MATCH (a)-[r]->(b) WHERE b IN ns \
             RETURN ns AS nodes, \
                    collect(DISTINCT {{from_id: a.id, to_id: b.id, rel_type: type(r)}}) AS edges"
        ))
        .param("id", id);

        let rows = self.store.read(q).await?;
        let row = match rows.first() {
            Some(row) => row,
            None => {
                return Err(GraphError::NodeNotFound {
                    label: label.to_string(),
                    id: id.to_string(),
                })
            }
        };

        let raw_nodes: Vec<Node> = row.get("nodes").map_err(row_error)?;
        let nodes = raw_nodes.iter().map(node_to_props).collect();

        let raw_edges: Vec<BoltType> = row.get("edges").map_err(row_error)?;
        let mut edges = Vec::new();
        for raw in raw_edges {
            if let Value::Object(edge) = bolt_to_json(raw) {
                let from_id = edge.get("from_id").and_then(Value::as_str);
                let to_id = edge.get("to_id").and_then(Value::as_str);
                let rel_type = edge.get("rel_type").and_then(Value::as_str);
                if let (Some(from_id), Some(to_id), Some(rel_type)) = (from_id, to_id, rel_type) {
                    edges.push(SubgraphEdge {
                        from_id: from_id.to_string(),
                        to_id: to_id.to_string(),
                        rel_type: rel_type.to_string(),
                    });
                }
            }
        }

        Ok(SubgraphView { nodes, edges })
    }

    /// Relationship counts per (type, neighbor label), largest first.
    pub async fn rel_stats(&self, label: &str, id: &str) -> GraphResult<Vec<RelStat>> {
        validate_identifier(label)?;
        let q = query(&format!(
            "MATCH (n:`{label}` {{id: $id}})-[r]-(m) \
             RETURN type(r) AS rel_type, head(labels(m)) AS neighbor_label, count(*) AS count \
             ORDER BY count DESC, rel_type ASC"
        ))
        .param("id", id);

        let rows = self.store.read(q).await?;
        rows.iter()
            .map(|row| {
                Ok(RelStat {
                    rel_type: row.get("rel_type").map_err(row_error)?,
                    neighbor_label: row.get("neighbor_label").map_err(row_error)?,
                    count: row.get("count").map_err(row_error)?,
                })
            })
            .collect()
    }

    /// Case-insensitive substring search across the listed property fields.
    ///
    /// Fields are OR-combined; a node matches when any field contains the
    /// query text.
    pub async fn search_by_text(
        &self,
        label: &str,
        text: &str,
        fields: &[String],
        limit: usize,
    ) -> GraphResult<Vec<Map<String, Value>>> {
        validate_identifier(label)?;
        if fields.is_empty() {
            return Err(GraphError::InvalidProperty {
                key: "fields".to_string(),
                reason: "at least one search field is required".to_string(),
            });
        }
        let mut conditions = Vec::with_capacity(fields.len());
        for field in fields {
            validate_identifier(field)?;
            conditions.push(format!(
                "toLower(toString(n.`{field}`)) CONTAINS toLower($text)"
            ));
        }

        let q = query(&format!(
            "MATCH (n:`{label}`) WHERE {} RETURN n LIMIT $limit",
            conditions.join(" OR ")
        ))
        .param("text", text)
        .param("limit", limit as i64);

        let rows = self.store.read(q).await?;
        rows.iter()
            .map(|row| {
                let node: Node = row.get("n").map_err(row_error)?;
                Ok(node_to_props(&node))
            })
            .collect()
    }
}

fn parse_path_row(row: &neo4rs::Row) -> GraphResult<GraphPath> {
    let length: i64 = row.get("len").map_err(row_error)?;
    let raw_nodes: Vec<BoltType> = row.get("nodes").map_err(row_error)?;
    let relationships: Vec<String> = row.get("rels").map_err(row_error)?;

    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for raw in raw_nodes {
        if let Value::Object(summary) = bolt_to_json(raw) {
            nodes.push(NodeSummary {
                id: summary
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                labels: summary
                    .get("labels")
                    .and_then(Value::as_array)
                    .map(|ls| {
                        ls.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                name: summary
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    Ok(GraphPath {
        length: length.max(0) as usize,
        nodes,
        relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_summary_serialization_skips_missing_name() {
        let summary = NodeSummary {
            id: "p1".to_string(),
            labels: vec!["Person".to_string()],
            name: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("name").is_none());
        assert_eq!(json["id"], "p1");
    }

    #[test]
    fn test_graph_path_serialization() {
        let path = GraphPath {
            length: 2,
            nodes: vec![
                NodeSummary {
                    id: "p1".into(),
                    labels: vec!["Person".into()],
                    name: Some("Alice".into()),
                },
                NodeSummary {
                    id: "p2".into(),
                    labels: vec!["Person".into()],
                    name: None,
                },
            ],
            relationships: vec!["KNOWS".into()],
        };
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json["length"], 2);
        assert_eq!(json["relationships"][0], "KNOWS");
        assert_eq!(json["nodes"][0]["name"], "Alice");
    }
}
