// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Analysis step: turns completion output into a [`ComplianceReport`].
//!
//! The completion service is asked for a strict JSON report. Model output
//! is still model output, so the parser tolerates prose and code fences
//! around the JSON, and a completion that fails to parse at all degrades
//! into a minimal report whose summary is the raw (sanitized) text rather
//! than failing the whole run.

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::errors::AnalysisParseError;
use crate::sanitizer::EgressSanitizer;
use crate::types::{
    ComplianceFinding, ComplianceReport, GraphContext, SanitizedExchange, SpecEntityKind,
};

pub fn analysis_system_prompt() -> &'static str {
    "You are an HTTP compliance auditor. Assess the provided sanitized \
     exchanges against the cited standards context. Respond with a single \
     JSON object only: {\"summary\", \"overallHealth\", \"findings\": \
     [{\"endpoint\", \"method\", \"status\", \"issues\": [{\"severity\", \
     \"description\", \"citations\"}], \"suggestions\"}]}. Statuses are \
     compliant|warning|critical; severities are info|low|medium|high|critical. \
     Citations are entity ids from the standards context."
}

/// Assemble the user turn from sanitized exchanges and the graph context.
/// Everything here has already crossed the sanitizer; raw exchanges never
/// reach this module.
pub fn analysis_user_prompt(
    exchanges: &[SanitizedExchange],
    graph: &GraphContext,
    question: Option<&str>,
) -> String {
    let exchanges_json =
        serde_json::to_string_pretty(exchanges).unwrap_or_else(|_| "[]".to_string());
    let graph_json = serde_json::to_string_pretty(graph).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "Sanitized exchanges from the probe:\n{exchanges_json}\n\nStandards context (knowledge graph subgraph):\n{graph_json}\n"
    );
    if let Some(q) = question {
        prompt.push_str(&format!("\nUser question: {q}\n"));
    }
    prompt.push_str("\nProduce the compliance report JSON now.");
    prompt
}

/// Report fields as the completion emits them, before finalization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub overall_health: String,
    #[serde(default)]
    pub findings: Vec<ComplianceFinding>,
    #[serde(default)]
    pub cited_entity_ids: Vec<String>,
}

/// Locate and parse the report JSON inside possibly-noisy completion text.
pub fn parse_report(text: &str) -> Result<ReportDraft, AnalysisParseError> {
    let start = text.find('{').ok_or_else(|| AnalysisParseError {
        reason: "no JSON object in completion output".to_string(),
    })?;
    let end = text.rfind('}').ok_or_else(|| AnalysisParseError {
        reason: "unterminated JSON object in completion output".to_string(),
    })?;
    if end <= start {
        return Err(AnalysisParseError {
            reason: "malformed JSON object in completion output".to_string(),
        });
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| AnalysisParseError {
        reason: e.to_string(),
    })
}

/// Minimal report draft wrapping unparseable completion output. The text
/// goes through the sanitizer once more before it becomes user-visible.
pub fn fallback_draft(raw_completion: &str, sanitizer: &EgressSanitizer) -> ReportDraft {
    ReportDraft {
        summary: sanitizer.sanitize_text(raw_completion),
        overall_health: "unknown".to_string(),
        findings: Vec::new(),
        cited_entity_ids: Vec::new(),
    }
}

/// Every entity id the draft cites: the explicit list unioned with every
/// issue citation, deduplicated.
pub fn cited_ids(draft: &ReportDraft) -> Vec<String> {
    let mut ids: BTreeSet<String> = draft.cited_entity_ids.iter().cloned().collect();
    for finding in &draft.findings {
        for issue in &finding.issues {
            ids.extend(issue.citations.iter().cloned());
        }
    }
    ids.into_iter().collect()
}

/// Kind for a cited-but-unknown id that must be upserted before the
/// report is finalized. Standards ids carry their document prefix.
pub fn kind_for_cited_id(id: &str) -> SpecEntityKind {
    let upper = id.to_uppercase();
    if upper.starts_with("RFC") || upper.starts_with("STD") {
        SpecEntityKind::StandardDoc
    } else {
        SpecEntityKind::RiskCategory
    }
}

/// Stamp and seal a draft into the report handed to the presentation
/// layer. Callers guarantee every cited id already exists in the store.
pub fn finalize_report(draft: ReportDraft, graph_context: GraphContext) -> ComplianceReport {
    let cited = cited_ids(&draft);
    ComplianceReport {
        summary: draft.summary,
        overall_health: draft.overall_health,
        findings: draft.findings,
        cited_entity_ids: cited,
        graph_context,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    const WELL_FORMED: &str = r#"Here is the report:
```json
{
  "summary": "One critical issue found.",
  "overallHealth": "poor",
  "findings": [
    {
      "endpoint": "/api/users/{id}",
      "method": "GET",
      "status": "critical",
      "issues": [
        {"severity": "high", "description": "PII returned in cleartext", "citations": ["CAT-02", "RFC7231"]}
      ],
      "suggestions": ["Strip PII fields from the response"]
    }
  ]
}
```"#;

    #[test]
    fn well_formed_report_parses_through_fences() {
        let draft = parse_report(WELL_FORMED).unwrap();
        assert_eq!(draft.overall_health, "poor");
        assert_eq!(draft.findings.len(), 1);
        assert_eq!(draft.findings[0].issues[0].severity, Severity::High);
    }

    #[test]
    fn cited_ids_union_explicit_and_issue_citations() {
        let mut draft = parse_report(WELL_FORMED).unwrap();
        draft.cited_entity_ids = vec!["CAT-05".to_string(), "CAT-02".to_string()];
        assert_eq!(cited_ids(&draft), vec!["CAT-02", "CAT-05", "RFC7231"]);
    }

    #[test]
    fn unparseable_output_is_a_typed_parse_error() {
        assert!(parse_report("I could not assess this target.").is_err());
        assert!(parse_report("{ truncated").is_err());
    }

    #[test]
    fn fallback_draft_sanitizes_the_raw_text() {
        let sanitizer = EgressSanitizer::default();
        let draft = fallback_draft("verdict unclear, contact ops@example.com", &sanitizer);
        assert!(draft.summary.contains("[REDACTED-EMAIL]"));
        assert_eq!(draft.overall_health, "unknown");
        assert!(draft.findings.is_empty());
    }

    #[test]
    fn cited_id_kind_resolution() {
        assert_eq!(kind_for_cited_id("RFC7231"), SpecEntityKind::StandardDoc);
        assert_eq!(kind_for_cited_id("STD66"), SpecEntityKind::StandardDoc);
        assert_eq!(kind_for_cited_id("CAT-03"), SpecEntityKind::RiskCategory);
    }
}
