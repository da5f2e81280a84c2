// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Audit orchestration: a strictly sequential state machine driving one
//! audit run end to end.
//!
//! States execute in a fixed order; any failure aborts the run
//! immediately, tagged with the state that was executing, and no partial
//! report is produced. The sandbox session is created at most once per
//! [`AuditContext`] and reused across runs; it is only torn down by an
//! explicit [`Auditor::reset_session`], never automatically on failure.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::analyzer;
use crate::completion::CompletionProvider;
use crate::errors::{AuditError, StageError};
use crate::extractor::SpecExtractor;
use crate::gateway::ToolGatewayClient;
use crate::graph::{is_valid_identifier, GraphStore};
use crate::probe::{self, fixture_start_code, probe_code};
use crate::sandbox::{SandboxClient, SessionHandle};
use crate::sanitizer::EgressSanitizer;
use crate::types::{ComplianceReport, GraphContext, SanitizedExchange};

/// The audit run states, in execution order. `Failed` and `Complete` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditState {
    CreateSession,
    StartFixture,
    Probe,
    Sanitize,
    DiscoverSpecs,
    FetchGraphContext,
    Analyze,
    Complete,
    Failed,
}

impl std::fmt::Display for AuditState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditState::CreateSession => "CreateSession",
            AuditState::StartFixture => "StartFixture",
            AuditState::Probe => "Probe",
            AuditState::Sanitize => "Sanitize",
            AuditState::DiscoverSpecs => "DiscoverSpecs",
            AuditState::FetchGraphContext => "FetchGraphContext",
            AuditState::Analyze => "Analyze",
            AuditState::Complete => "Complete",
            AuditState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Per-deployment audit context: the shared sandbox session plus the last
/// successfully fetched graph context, reused when a later run discovers
/// nothing new.
#[derive(Default)]
pub struct AuditContext {
    session: OnceCell<SessionHandle>,
    last_graph_context: RwLock<Option<GraphContext>>,
}

impl AuditContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.get()
    }
}

pub struct Auditor {
    gateway: Arc<ToolGatewayClient>,
    sandbox: SandboxClient,
    extractor: SpecExtractor,
    graph: GraphStore,
    completion: Arc<dyn CompletionProvider>,
    sanitizer: Arc<EgressSanitizer>,
    fixture_dir: String,
    fixture_base: String,
}

impl Auditor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<ToolGatewayClient>,
        sandbox: SandboxClient,
        completion: Arc<dyn CompletionProvider>,
        sanitizer: Arc<EgressSanitizer>,
        catalog_ttl: chrono::Duration,
        fixture_dir: impl Into<String>,
        fixture_base: impl Into<String>,
    ) -> Self {
        let extractor = SpecExtractor::new(Arc::clone(&gateway), Arc::clone(&completion), catalog_ttl);
        let graph = GraphStore::new(Arc::clone(&gateway));
        Self {
            gateway,
            sandbox,
            extractor,
            graph,
            completion,
            sanitizer,
            fixture_dir: fixture_dir.into(),
            fixture_base: fixture_base.into(),
        }
    }

    /// Run one full audit. On failure the error names the state that was
    /// executing and nothing is returned; the session survives for the
    /// next run.
    pub async fn run_audit(
        &self,
        ctx: &AuditContext,
        question: Option<&str>,
    ) -> Result<ComplianceReport, AuditError> {
        // -- CreateSession ---------------------------------------------------
        tracing::debug!(state = %AuditState::CreateSession, "entering audit state");
        let session = ctx
            .session
            .get_or_try_init(|| self.sandbox.create())
            .await
            .map_err(|e| AuditError::at(AuditState::CreateSession, e))?
            .clone();

        // -- StartFixture ----------------------------------------------------
        tracing::debug!(state = %AuditState::StartFixture, "entering audit state");
        self.run_code(&session, fixture_start_code(&self.fixture_dir))
            .await
            .map_err(|e| AuditError::at(AuditState::StartFixture, e))?;

        // -- Probe -----------------------------------------------------------
        tracing::debug!(state = %AuditState::Probe, "entering audit state");
        let probe_output = self
            .run_code(&session, probe_code(&self.fixture_base))
            .await
            .map_err(|e| AuditError::at(AuditState::Probe, e))?;
        let raw_exchanges = probe::parse_exchanges(&probe_output)
            .map_err(|e| AuditError::at(AuditState::Probe, e))?;
        if raw_exchanges.is_empty() {
            return Err(AuditError::at(AuditState::Probe, StageError::NoExchanges));
        }

        // -- Sanitize --------------------------------------------------------
        // Raw exchanges stop existing past this point.
        tracing::debug!(state = %AuditState::Sanitize, "entering audit state");
        let sanitized: Vec<SanitizedExchange> = raw_exchanges
            .into_iter()
            .map(|raw| probe::sanitize_exchange(raw, &self.sanitizer))
            .collect();
        tracing::info!(exchanges = sanitized.len(), "probe exchanges sanitized");

        // -- DiscoverSpecs ---------------------------------------------------
        tracing::debug!(state = %AuditState::DiscoverSpecs, "entering audit state");
        let research = self
            .gateway
            .invoke_text(
                "research",
                json!({ "query": research_query(&sanitized) }),
            )
            .await
            .map_err(|e| AuditError::at(AuditState::DiscoverSpecs, e))?;

        let corpus = format!("{research}\n{}", observation_text(&sanitized));
        let entities = self.extractor.extract(&corpus).await;
        let stats = self
            .graph
            .upsert_entities(&entities)
            .await
            .map_err(|e| AuditError::at(AuditState::DiscoverSpecs, e))?;
        tracing::info!(
            written = stats.written,
            dropped = stats.dropped,
            "discovered entities upserted"
        );

        // -- FetchGraphContext -----------------------------------------------
        tracing::debug!(state = %AuditState::FetchGraphContext, "entering audit state");
        let entity_ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let graph_context = if entity_ids.is_empty() {
            // Nothing new discovered: fall back to the last known context.
            ctx.last_graph_context
                .read()
                .await
                .clone()
                .unwrap_or_default()
        } else {
            let fetched = self
                .graph
                .subgraph(&entity_ids)
                .await
                .map_err(|e| AuditError::at(AuditState::FetchGraphContext, e))?;
            *ctx.last_graph_context.write().await = Some(fetched.clone());
            fetched
        };

        // -- Analyze ---------------------------------------------------------
        tracing::debug!(state = %AuditState::Analyze, "entering audit state");
        let completion_text = self
            .completion
            .complete(
                analyzer::analysis_system_prompt(),
                &analyzer::analysis_user_prompt(&sanitized, &graph_context, question),
            )
            .await
            .map_err(|e| {
                AuditError::at(AuditState::Analyze, StageError::Completion(e.to_string()))
            })?;

        let mut draft = match analyzer::parse_report(&completion_text) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(error = %e, "analysis output unparseable, degrading to minimal report");
                analyzer::fallback_draft(&completion_text, &self.sanitizer)
            }
        };
        retain_valid_citations(&mut draft);

        let final_context = self
            .finalize_citations(&draft, &graph_context)
            .await
            .map_err(|e| AuditError::at(AuditState::Analyze, e))?;
        *ctx.last_graph_context.write().await = Some(final_context.clone());

        // -- Complete --------------------------------------------------------
        let report = analyzer::finalize_report(draft, final_context);
        tracing::info!(
            state = %AuditState::Complete,
            findings = report.findings.len(),
            cited = report.cited_entity_ids.len(),
            "audit run complete"
        );
        Ok(report)
    }

    /// Tear down the shared session and drop cached graph context. The
    /// only path that destroys a sandbox.
    pub async fn reset_session(&self, ctx: &mut AuditContext) -> Result<(), AuditError> {
        if let Some(handle) = ctx.session.take() {
            self.sandbox
                .destroy(&handle)
                .await
                .map_err(|e| AuditError::at(AuditState::Failed, e))?;
        }
        *ctx.last_graph_context.write().await = None;
        Ok(())
    }

    async fn run_code(
        &self,
        session: &SessionHandle,
        code: String,
    ) -> Result<String, crate::errors::GatewayError> {
        self.gateway
            .invoke_text(
                "run_code",
                json!({
                    "sandboxId": session.sandbox_id,
                    "language": "python",
                    "code": code,
                }),
            )
            .await
    }

    /// Upsert any cited id the fetched context does not already hold, then
    /// re-read the subgraph so the report's context covers every citation.
    async fn finalize_citations(
        &self,
        draft: &analyzer::ReportDraft,
        context: &GraphContext,
    ) -> Result<GraphContext, crate::errors::GatewayError> {
        let cited = analyzer::cited_ids(draft);
        if cited.is_empty() {
            return Ok(context.clone());
        }

        let known: Vec<&str> = context.nodes.iter().map(|n| n.id.as_str()).collect();
        for id in &cited {
            if known.contains(&id.as_str()) {
                continue;
            }
            let kind = analyzer::kind_for_cited_id(id);
            let mut props = std::collections::BTreeMap::new();
            props.insert("title".to_string(), id.clone());
            match self.graph.upsert_node(kind, id, &props).await {
                Ok(()) => {}
                Err(crate::errors::GraphStoreError::Validation(e)) => {
                    // Already filtered upstream; belt and braces.
                    tracing::warn!(id = %id, error = %e, "skipping invalid cited id");
                }
                Err(crate::errors::GraphStoreError::Gateway(e)) => return Err(e),
            }
        }

        let mut all_ids: Vec<String> = context.nodes.iter().map(|n| n.id.clone()).collect();
        all_ids.extend(cited);
        all_ids.sort();
        all_ids.dedup();
        self.graph.subgraph(&all_ids).await
    }
}

fn research_query(sanitized: &[SanitizedExchange]) -> String {
    let endpoints: Vec<String> = sanitized
        .iter()
        .map(|e| format!("{} {}", e.method, e.url_template))
        .collect();
    format!(
        "HTTP compliance standards and security risk categories relevant to these endpoints: {}",
        endpoints.join(", ")
    )
}

fn observation_text(sanitized: &[SanitizedExchange]) -> String {
    sanitized
        .iter()
        .map(|e| {
            format!(
                "{} {} [{:?}] {}",
                e.method, e.url_template, e.body_kind, e.body_preview
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop citations that violate the identifier grammar before they reach
/// the graph or the report.
fn retain_valid_citations(draft: &mut analyzer::ReportDraft) {
    draft.cited_entity_ids.retain(|id| is_valid_identifier(id));
    for finding in &mut draft.findings {
        for issue in &mut finding.issues {
            issue.citations.retain(|id| is_valid_identifier(id));
        }
    }
}

/// The one rendering of a failed run allowed to reach the user: state
/// name plus a sanitized failure message.
pub fn user_visible_failure(error: &AuditError, sanitizer: &EgressSanitizer) -> String {
    format!(
        "audit failed during {}: {}",
        error.state,
        sanitizer.sanitize_text(&error.source.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_are_stable() {
        let states = [
            (AuditState::CreateSession, "CreateSession"),
            (AuditState::StartFixture, "StartFixture"),
            (AuditState::Probe, "Probe"),
            (AuditState::Sanitize, "Sanitize"),
            (AuditState::DiscoverSpecs, "DiscoverSpecs"),
            (AuditState::FetchGraphContext, "FetchGraphContext"),
            (AuditState::Analyze, "Analyze"),
            (AuditState::Complete, "Complete"),
            (AuditState::Failed, "Failed"),
        ];
        for (state, name) in states {
            assert_eq!(state.to_string(), name);
        }
    }

    #[test]
    fn failure_rendering_is_sanitized() {
        let error = AuditError::at(
            AuditState::Probe,
            StageError::ProbeOutput {
                reason: "unexpected token near admin@example.com".to_string(),
            },
        );
        let rendered = user_visible_failure(&error, &EgressSanitizer::default());
        assert!(rendered.starts_with("audit failed during Probe"));
        assert!(!rendered.contains("admin@example.com"));
        assert!(rendered.contains("[REDACTED-EMAIL]"));
    }

    #[test]
    fn invalid_citations_are_dropped() {
        let mut draft = analyzer::parse_report(
            r#"{"summary":"s","overallHealth":"ok","findings":[{"endpoint":"/x","method":"GET","status":"warning","issues":[{"severity":"low","description":"d","citations":["CAT-01","bad id'); DROP"]}],"suggestions":[]}],"citedEntityIds":["RFC7231","nope!"]}"#,
        )
        .unwrap();
        retain_valid_citations(&mut draft);
        assert_eq!(draft.cited_entity_ids, vec!["RFC7231"]);
        assert_eq!(draft.findings[0].issues[0].citations, vec!["CAT-01"]);
    }

    #[test]
    fn research_query_carries_templates_not_raw_urls() {
        let sanitized = vec![SanitizedExchange {
            method: "GET".to_string(),
            url_template: "/api/users/{id}".to_string(),
            header_names: vec![],
            body_kind: crate::types::BodyKind::Json,
            body_preview: String::new(),
        }];
        let query = research_query(&sanitized);
        assert!(query.contains("GET /api/users/{id}"));
    }
}
