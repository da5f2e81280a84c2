// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Graph store adapter.
//!
//! Upserts and reads standard-citation entities in the external graph
//! store, reached exclusively through the tool gateway's `graph_query`
//! tool — no database driver lives here.
//!
//! Ids and relationship types are interpolated into a Cypher-style
//! pattern-match language, so both pass a strict grammar check before any
//! query is assembled, and every free-text property value is escaped. The
//! gateway tool accepts only a query string (no bound parameters), which
//! makes the grammar checks the injection defense rather than merely
//! defense-in-depth.
//!
//! Writes use MERGE keyed by id: re-upserting the same id refreshes
//! properties and never duplicates the node. One invalid entity is dropped
//! with a warning; it never aborts the rest of its batch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{GatewayResult, StoreValidationError};
use crate::gateway::ToolGatewayClient;
use crate::types::{GraphContext, GraphEdge, GraphNode, SpecEntity, SpecEntityKind};

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static REL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_]+$").unwrap());
static PROP_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Identifier grammar enforced before any interpolation.
pub fn is_valid_identifier(id: &str) -> bool {
    ID_RE.is_match(id)
}

/// Relationship-type grammar: uppercase letters and underscores only.
pub fn is_valid_rel_type(rel_type: &str) -> bool {
    REL_RE.is_match(rel_type)
}

/// Escape a free-text property value for embedding in a single-quoted
/// query literal. Backslash first, then quotes and control characters.
pub fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Outcome of a batch upsert: how many entities were written and how many
/// were dropped by validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub written: usize,
    pub dropped: usize,
}

// ---------------------------------------------------------------------------
// Query assembly (pure, so validation is testable without a gateway)
// ---------------------------------------------------------------------------

fn build_merge_node(
    kind: SpecEntityKind,
    id: &str,
    props: &BTreeMap<String, String>,
) -> Result<String, StoreValidationError> {
    if !is_valid_identifier(id) {
        return Err(StoreValidationError::InvalidId { id: id.to_string() });
    }
    let mut query = format!("MERGE (n:{} {{id: '{}'}})", kind.label(), id);
    let mut assignments = Vec::new();
    for (key, value) in props {
        if !PROP_KEY_RE.is_match(key) {
            tracing::warn!(%key, "skipping property with invalid key");
            continue;
        }
        assignments.push(format!("n.{} = '{}'", key, escape_text(value)));
    }
    if !assignments.is_empty() {
        query.push_str(" SET ");
        query.push_str(&assignments.join(", "));
    }
    Ok(query)
}

fn build_merge_edge(
    source_id: &str,
    rel_type: &str,
    target_id: &str,
) -> Result<String, StoreValidationError> {
    if !is_valid_identifier(source_id) {
        return Err(StoreValidationError::InvalidId {
            id: source_id.to_string(),
        });
    }
    if !is_valid_identifier(target_id) {
        return Err(StoreValidationError::InvalidId {
            id: target_id.to_string(),
        });
    }
    if !is_valid_rel_type(rel_type) {
        return Err(StoreValidationError::InvalidRelType {
            rel_type: rel_type.to_string(),
        });
    }
    Ok(format!(
        "MERGE (a {{id: '{source_id}'}}) MERGE (b {{id: '{target_id}'}}) MERGE (a)-[:{rel_type}]->(b)"
    ))
}

/// Quote a validated id list for an `IN` clause.
fn id_list(ids: &[&str]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Result-row decoding
// ---------------------------------------------------------------------------

/// The gateway normalizes responses to one value, but the graph tool
/// itself answers in more than one shape: a bare row array, `{rows: [..]}`,
/// or the whole thing serialized as a string. Peel those layers.
fn rows_of(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(rows) => rows.clone(),
        Value::Object(map) => {
            for key in ["rows", "results", "data"] {
                if let Some(Value::Array(rows)) = map.get(key) {
                    return rows.clone();
                }
            }
            Vec::new()
        }
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(inner) => rows_of(&inner),
            Err(_) => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn node_from_row(row: &Value) -> Option<GraphNode> {
    let id = row.get("id")?.as_str()?.to_string();
    let kind = row
        .get("kind")
        .or_else(|| row.get("label"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let mut properties = BTreeMap::new();
    if let Some(Value::Object(props)) = row.get("properties") {
        for (k, v) in props {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            properties.insert(k.clone(), rendered);
        }
    }
    Some(GraphNode {
        id,
        kind,
        properties,
    })
}

fn edge_from_row(row: &Value) -> Option<GraphEdge> {
    let source_id = row
        .get("sourceId")
        .or_else(|| row.get("source_id"))
        .or_else(|| row.get("source"))?
        .as_str()?
        .to_string();
    let target_id = row
        .get("targetId")
        .or_else(|| row.get("target_id"))
        .or_else(|| row.get("target"))?
        .as_str()?
        .to_string();
    let rel_type = row
        .get("relType")
        .or_else(|| row.get("rel_type"))
        .or_else(|| row.get("type"))?
        .as_str()?
        .to_string();
    Some(GraphEdge {
        source_id,
        target_id,
        rel_type,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct GraphStore {
    gateway: Arc<ToolGatewayClient>,
}

impl GraphStore {
    pub fn new(gateway: Arc<ToolGatewayClient>) -> Self {
        Self { gateway }
    }

    async fn run_query(&self, query: String) -> GatewayResult<Value> {
        self.gateway
            .invoke("graph_query", json!({ "query": query }))
            .await
    }

    /// Idempotent node write keyed by id.
    pub async fn upsert_node(
        &self,
        kind: SpecEntityKind,
        id: &str,
        props: &BTreeMap<String, String>,
    ) -> Result<(), crate::errors::GraphStoreError> {
        let query = build_merge_node(kind, id, props)?;
        self.run_query(query).await?;
        Ok(())
    }

    /// Idempotent edge write between two existing-or-created nodes.
    pub async fn upsert_edge(
        &self,
        source_id: &str,
        rel_type: &str,
        target_id: &str,
    ) -> Result<(), crate::errors::GraphStoreError> {
        let query = build_merge_edge(source_id, rel_type, target_id)?;
        self.run_query(query).await?;
        Ok(())
    }

    /// Upsert a whole discovery batch. Entities failing validation are
    /// dropped with a warning and counted; gateway failures abort.
    pub async fn upsert_entities(&self, entities: &[SpecEntity]) -> GatewayResult<UpsertStats> {
        let mut stats = UpsertStats::default();

        for entity in entities {
            let mut props = BTreeMap::new();
            props.insert("title".to_string(), entity.title.clone());
            if let Some(version) = &entity.version {
                props.insert("version".to_string(), version.clone());
            }
            if !entity.sections.is_empty() {
                props.insert("sections".to_string(), entity.sections.join(","));
            }

            let node_query = match build_merge_node(entity.kind, &entity.id, &props) {
                Ok(q) => q,
                Err(e) => {
                    tracing::warn!(entity = %entity.id, error = %e, "dropping entity from batch");
                    stats.dropped += 1;
                    continue;
                }
            };
            self.run_query(node_query).await?;
            stats.written += 1;

            for relation in &entity.relates_to {
                match build_merge_edge(&entity.id, &relation.rel_type, &relation.target_id) {
                    Ok(q) => {
                        self.run_query(q).await?;
                    }
                    Err(e) => {
                        tracing::warn!(
                            entity = %entity.id,
                            error = %e,
                            "dropping relationship from batch"
                        );
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Read back nodes for a validated id set. Invalid ids are skipped.
    pub async fn nodes_by_ids(&self, ids: &[String]) -> GatewayResult<Vec<GraphNode>> {
        let valid: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| is_valid_identifier(id))
            .collect();
        if valid.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "MATCH (n) WHERE n.id IN [{}] RETURN n.id AS id, labels(n)[0] AS kind, properties(n) AS properties",
            id_list(&valid)
        );
        let payload = self.run_query(query).await?;
        Ok(rows_of(&payload).iter().filter_map(node_from_row).collect())
    }

    /// Read back every edge touching the id set, in either direction.
    pub async fn edges_incident(&self, ids: &[String]) -> GatewayResult<Vec<GraphEdge>> {
        let valid: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| is_valid_identifier(id))
            .collect();
        if valid.is_empty() {
            return Ok(Vec::new());
        }
        let list = id_list(&valid);
        let query = format!(
            "MATCH (a)-[r]->(b) WHERE a.id IN [{list}] OR b.id IN [{list}] RETURN a.id AS sourceId, type(r) AS relType, b.id AS targetId"
        );
        let payload = self.run_query(query).await?;
        Ok(rows_of(&payload).iter().filter_map(edge_from_row).collect())
    }

    /// The subgraph touching the given ids: nodes plus adjoining edges.
    pub async fn subgraph(&self, ids: &[String]) -> GatewayResult<GraphContext> {
        Ok(GraphContext {
            nodes: self.nodes_by_ids(ids).await?,
            edges: self.edges_incident(ids).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_grammar() {
        assert!(is_valid_identifier("RFC7231"));
        assert!(is_valid_identifier("CAT-03"));
        assert!(is_valid_identifier("a_b-C9"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("bad id"));
        assert!(!is_valid_identifier("x'}) DETACH DELETE (n) //"));
        assert!(!is_valid_identifier("semi;colon"));
    }

    #[test]
    fn rel_type_grammar() {
        assert!(is_valid_rel_type("CITES"));
        assert!(is_valid_rel_type("RELATES_TO"));
        assert!(!is_valid_rel_type("cites"));
        assert!(!is_valid_rel_type("CITES-X"));
        assert!(!is_valid_rel_type(""));
    }

    #[test]
    fn escaping_handles_backslash_first() {
        assert_eq!(escape_text(r"a\b"), r"a\\b");
        assert_eq!(escape_text("it's"), r"it\'s");
        assert_eq!(escape_text("a\nb\tc\r"), r"a\nb\tc\r");
        assert_eq!(escape_text(r#"say "hi""#), r#"say \"hi\""#);
        // A backslash-quote pair must not collapse into an unescaped quote.
        assert_eq!(escape_text(r"\'"), r"\\\'");
    }

    #[test]
    fn merge_node_query_embeds_escaped_props() {
        let mut props = BTreeMap::new();
        props.insert("title".to_string(), "O'Reilly \"guide\"".to_string());
        let q = build_merge_node(SpecEntityKind::StandardDoc, "RFC7231", &props).unwrap();
        assert!(q.starts_with("MERGE (n:StandardDoc {id: 'RFC7231'})"));
        assert!(q.contains(r#"n.title = 'O\'Reilly \"guide\"'"#));
    }

    #[test]
    fn invalid_id_is_rejected_before_any_query_exists() {
        let err = build_merge_node(
            SpecEntityKind::RiskCategory,
            "oops'}) MATCH (m) DETACH DELETE m //",
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreValidationError::InvalidId { .. }));
    }

    #[test]
    fn invalid_rel_type_is_rejected() {
        let err = build_merge_edge("A1", "cites", "B2").unwrap_err();
        assert!(matches!(err, StoreValidationError::InvalidRelType { .. }));
        assert!(build_merge_edge("A1", "CITES", "B2").is_ok());
    }

    #[test]
    fn invalid_prop_keys_are_skipped_not_fatal() {
        let mut props = BTreeMap::new();
        props.insert("ok_key".to_string(), "v".to_string());
        props.insert("bad key'".to_string(), "v".to_string());
        let q = build_merge_node(SpecEntityKind::StandardDoc, "X1", &props).unwrap();
        assert!(q.contains("n.ok_key"));
        assert!(!q.contains("bad key"));
    }

    #[test]
    fn row_decoding_accepts_known_shapes() {
        let bare = serde_json::json!([{"id":"RFC7231","kind":"StandardDoc","properties":{"title":"RFC 7231"}}]);
        assert_eq!(rows_of(&bare).len(), 1);

        let wrapped = serde_json::json!({"rows":[{"id":"A","kind":"RiskCategory"}]});
        assert_eq!(rows_of(&wrapped).len(), 1);

        let stringified = serde_json::Value::String(bare.to_string());
        let rows = rows_of(&stringified);
        let node = node_from_row(&rows[0]).unwrap();
        assert_eq!(node.id, "RFC7231");
        assert_eq!(node.properties["title"], "RFC 7231");
    }

    #[test]
    fn edge_rows_accept_alias_spellings() {
        let row = serde_json::json!({"source":"A","type":"CITES","target":"B"});
        let edge = edge_from_row(&row).unwrap();
        assert_eq!(edge.source_id, "A");
        assert_eq!(edge.rel_type, "CITES");
        assert_eq!(edge.target_id, "B");
    }
}
