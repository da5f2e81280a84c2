// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Core data model: probed exchanges, standard-citation entities, graph
//! records, and the compliance report handed to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named tool invocation travelling through the interception pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: Value,
}

/// Successful tool payload after envelope normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub payload: Value,
}

impl ToolResult {
    /// Best-effort text view of the payload for prompt assembly.
    pub fn as_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A raw probed HTTP exchange.
///
/// Exists only inside the trusted execution context. Derives `Deserialize`
/// because the trusted sandbox hands it to us, but deliberately not
/// `Serialize`: raw exchanges must never be written outward. Only its
/// [`SanitizedExchange`] projection crosses the egress boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    #[serde(default = "default_http_version")]
    pub http_version: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

fn default_http_version() -> String {
    "HTTP/1.1".to_string()
}

/// Coarse body classification attached to a sanitized exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Json,
    Text,
    Html,
    Binary,
    Empty,
    Unknown,
}

/// The only projection of an exchange allowed past the egress boundary:
/// header names without values, a templated URL, and a redacted preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedExchange {
    pub method: String,
    pub url_template: String,
    pub header_names: Vec<String>,
    pub body_kind: BodyKind,
    pub body_preview: String,
}

/// Entity family for cited standards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecEntityKind {
    StandardDoc,
    RiskCategory,
}

impl SpecEntityKind {
    /// Graph label. Static strings, so never subject to interpolation checks.
    pub fn label(&self) -> &'static str {
        match self {
            SpecEntityKind::StandardDoc => "StandardDoc",
            SpecEntityKind::RiskCategory => "RiskCategory",
        }
    }
}

/// Outgoing relationship carried by an extracted entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    pub rel_type: String,
    pub target_id: String,
}

/// A normalized record for a cited external standard or risk category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecEntity {
    pub kind: SpecEntityKind,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relates_to: Vec<EntityRelation>,
}

impl SpecEntity {
    pub fn standard(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: SpecEntityKind::StandardDoc,
            id: id.into(),
            title: title.into(),
            version: None,
            sections: Vec::new(),
            relates_to: Vec::new(),
        }
    }

    pub fn risk_category(
        id: impl Into<String>,
        title: impl Into<String>,
        version: Option<String>,
    ) -> Self {
        Self {
            kind: SpecEntityKind::RiskCategory,
            id: id.into(),
            title: title.into(),
            version,
            sections: Vec::new(),
            relates_to: Vec::new(),
        }
    }
}

/// A node as read back from the external graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A relationship as read back from the external graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
}

/// Subgraph attached to a report and cached for follow-up turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphContext {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Issue severity, ordered so findings can be ranked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint compliance verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Compliant,
    Warning,
    Critical,
}

/// One concrete problem on an endpoint, with standard citations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceIssue {
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// All issues found on one probed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceFinding {
    pub endpoint: String,
    pub method: String,
    pub status: ComplianceStatus,
    #[serde(default)]
    pub issues: Vec<ComplianceIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// The report handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub summary: String,
    pub overall_health: String,
    pub findings: Vec<ComplianceFinding>,
    pub cited_entity_ids: Vec<String>,
    pub graph_context: GraphContext,
    pub generated_at: DateTime<Utc>,
}
