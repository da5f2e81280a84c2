// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Spec extractor: free-form research text in, deduplicated
//! standard-citation entities out.
//!
//! Two entity families:
//!
//! - Standards documents (`RFC 7231`, `STD 66`, ...): a numeric-identifier
//!   scan. Distinct numbers become one entity each no matter how often they
//!   repeat. An identifier matched only here and absent from any catalog is
//!   still emitted — under-identification is worse than over-identification,
//!   because downstream graph nodes are safe to create with minimal
//!   metadata.
//! - Versioned risk categories: matched against a catalog of
//!   `{id, title, detectionPattern, keywords}`. The catalog is fetched at
//!   most once per cache window (research tool + structuring completion) and
//!   falls back to a built-in list on any fetch, parse, or structuring
//!   failure. Both match modes run — pattern hit and case-insensitive
//!   keyword containment — and their hits are unioned, deduped by id.
//!
//! The catalog cache is an explicit state machine
//! (`Uncached / Cached / FallbackActive`) with deterministic transitions,
//! not a bare nullable plus scattered error handling.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::completion::CompletionProvider;
use crate::gateway::ToolGatewayClient;
use crate::graph::is_valid_identifier;
use crate::types::{EntityRelation, SpecEntity, SpecEntityKind};

static STANDARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(RFC|STD)[ -]?(\d{2,5})\b").unwrap());

/// Extract the standards-document family. Pure and deterministic.
pub fn extract_standards(text: &str) -> Vec<SpecEntity> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in STANDARD_RE.captures_iter(text) {
        let prefix = caps[1].to_uppercase();
        let digits = &caps[2];
        let id = format!("{prefix}{digits}");
        if seen.insert(id.clone()) {
            out.push(SpecEntity::standard(id, format!("{prefix} {digits}")));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Risk-category catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    pub detection_pattern: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CatalogEntry {
    fn new(id: &str, title: &str, pattern: &str, keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            version: Some("2021".to_string()),
            detection_pattern: pattern.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Built-in catalog used whenever the dynamic fetch is unavailable.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new(
            "CAT-01",
            "Broken Access Control",
            r"(?i)\bCAT-?0?1\b",
            &["access control", "unauthorized", "idor", "privilege escalation"],
        ),
        CatalogEntry::new(
            "CAT-02",
            "Sensitive Data Exposure",
            r"(?i)\bCAT-?0?2\b",
            &["pii", "personal data", "sensitive data", "data exposure", "cleartext"],
        ),
        CatalogEntry::new(
            "CAT-03",
            "Injection",
            r"(?i)\bCAT-?0?3\b",
            &["injection", "sqli", "sql injection", "xss", "cross-site scripting", "reflected input"],
        ),
        CatalogEntry::new(
            "CAT-04",
            "Insecure Design",
            r"(?i)\bCAT-?0?4\b",
            &["insecure design", "threat model"],
        ),
        CatalogEntry::new(
            "CAT-05",
            "Security Misconfiguration",
            r"(?i)\bCAT-?0?5\b",
            &[
                "misconfiguration",
                "cors",
                "access-control-allow-origin",
                "stack trace",
                "verbose error",
                "debug mode",
            ],
        ),
        CatalogEntry::new(
            "CAT-06",
            "Vulnerable and Outdated Components",
            r"(?i)\bCAT-?0?6\b",
            &["outdated component", "vulnerable component", "cve"],
        ),
        CatalogEntry::new(
            "CAT-07",
            "Identification and Authentication Failures",
            r"(?i)\bCAT-?0?7\b",
            &["authentication failure", "session fixation", "weak password", "credential stuffing"],
        ),
        CatalogEntry::new(
            "CAT-08",
            "Software and Data Integrity Failures",
            r"(?i)\bCAT-?0?8\b",
            &["deserialization", "integrity failure", "unsigned update"],
        ),
        CatalogEntry::new(
            "CAT-09",
            "Security Logging and Monitoring Failures",
            r"(?i)\bCAT-?0?9\b",
            &["insufficient logging", "monitoring failure", "audit trail"],
        ),
        CatalogEntry::new(
            "CAT-10",
            "Server-Side Request Forgery",
            r"(?i)\bCAT-?10\b",
            &["ssrf", "server-side request forgery"],
        ),
    ]
}

/// Match text against a catalog two ways and union the hits.
pub fn match_catalog(text: &str, catalog: &[CatalogEntry]) -> Vec<SpecEntity> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for entry in catalog {
        let pattern_hit = match Regex::new(&entry.detection_pattern) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                tracing::warn!(id = %entry.id, error = %e, "invalid catalog detection pattern, keywords only");
                false
            }
        };
        let keyword_hit = entry
            .keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()));

        if (pattern_hit || keyword_hit) && seen.insert(entry.id.clone()) {
            out.push(SpecEntity::risk_category(
                entry.id.clone(),
                entry.title.clone(),
                entry.version.clone(),
            ));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Catalog cache state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CatalogState {
    Uncached,
    Cached {
        catalog: Arc<Vec<CatalogEntry>>,
        expires_at: DateTime<Utc>,
    },
    FallbackActive {
        retry_at: DateTime<Utc>,
    },
}

/// What the extractor should do for the current state at `now`.
#[derive(Debug)]
pub enum CachePlan {
    UseCached(Arc<Vec<CatalogEntry>>),
    UseFallback,
    Fetch,
}

pub fn plan(state: &CatalogState, now: DateTime<Utc>) -> CachePlan {
    match state {
        CatalogState::Uncached => CachePlan::Fetch,
        CatalogState::Cached { catalog, expires_at } if *expires_at > now => {
            CachePlan::UseCached(Arc::clone(catalog))
        }
        CatalogState::Cached { .. } => CachePlan::Fetch,
        CatalogState::FallbackActive { retry_at } if *retry_at > now => CachePlan::UseFallback,
        CatalogState::FallbackActive { .. } => CachePlan::Fetch,
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct SpecExtractor {
    gateway: Arc<ToolGatewayClient>,
    completion: Arc<dyn CompletionProvider>,
    cache: Mutex<CatalogState>,
    ttl: Duration,
}

const STRUCTURING_SYSTEM: &str = "You convert research notes about security risk \
category lists into structured data. Respond with a JSON array only, no prose. \
Each element: {\"id\", \"title\", \"version\", \"detectionPattern\", \"keywords\"}. \
Ids contain only letters, digits, hyphens, and underscores.";

impl SpecExtractor {
    pub fn new(
        gateway: Arc<ToolGatewayClient>,
        completion: Arc<dyn CompletionProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            completion,
            cache: Mutex::new(CatalogState::Uncached),
            ttl,
        }
    }

    /// Extract both entity families from research text, deduplicated by id.
    /// Co-cited categories gain a CITES relation to each standard in the
    /// same text, which is what lets the graph grow edges over time.
    pub async fn extract(&self, text: &str) -> Vec<SpecEntity> {
        let standards = extract_standards(text);
        let catalog = self.catalog().await;
        let mut categories = match_catalog(text, &catalog);

        for category in &mut categories {
            category.relates_to = standards
                .iter()
                .map(|s| EntityRelation {
                    rel_type: "CITES".to_string(),
                    target_id: s.id.clone(),
                })
                .collect();
        }

        let mut seen = HashSet::new();
        standards
            .into_iter()
            .chain(categories)
            .filter(|e| seen.insert(e.id.clone()))
            .collect()
    }

    /// Resolve the current catalog, fetching at most once per cache window.
    pub async fn catalog(&self) -> Arc<Vec<CatalogEntry>> {
        let mut state = self.cache.lock().await;
        let now = Utc::now();
        match plan(&state, now) {
            CachePlan::UseCached(catalog) => catalog,
            CachePlan::UseFallback => Arc::new(default_catalog()),
            CachePlan::Fetch => match self.fetch_catalog().await {
                Ok(catalog) => {
                    let catalog = Arc::new(catalog);
                    *state = CatalogState::Cached {
                        catalog: Arc::clone(&catalog),
                        expires_at: now + self.ttl,
                    };
                    catalog
                }
                Err(reason) => {
                    tracing::warn!(%reason, "catalog fetch failed, using built-in catalog");
                    *state = CatalogState::FallbackActive {
                        retry_at: now + self.ttl,
                    };
                    Arc::new(default_catalog())
                }
            },
        }
    }

    /// Ask the research tool for the current category list and structure
    /// the answer through the completion service. Any failure is reported
    /// as a reason string; the caller transitions to fallback.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, String> {
        let research = self
            .gateway
            .invoke_text(
                "research",
                json!({
                    "query": "current canonical list of web application security risk categories with identifiers and titles"
                }),
            )
            .await
            .map_err(|e| e.to_string())?;

        let structured = self
            .completion
            .complete(STRUCTURING_SYSTEM, &research)
            .await
            .map_err(|e| e.to_string())?;

        let block = extract_json_array(&structured)
            .ok_or_else(|| "no JSON array in structuring output".to_string())?;
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(block).map_err(|e| e.to_string())?;

        let valid: Vec<CatalogEntry> = entries
            .into_iter()
            .filter(|e| {
                let ok = is_valid_identifier(&e.id);
                if !ok {
                    tracing::warn!(id = %e.id, "dropping catalog entry with invalid id");
                }
                ok
            })
            .collect();

        if valid.is_empty() {
            return Err("structured catalog contained no valid entries".to_string());
        }
        Ok(valid)
    }
}

/// Find the outermost JSON array in completion output that may be wrapped
/// in prose or code fences.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
