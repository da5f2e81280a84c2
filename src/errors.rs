// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Error taxonomy for the compliance auditor.
//!
//! Layered the same way the runtime is: leaf components carry their own
//! error enums, the orchestrator wraps whichever one aborted a run in
//! [`AuditError`] together with the state that was executing.

use thiserror::Error;

use crate::orchestrator::AuditState;

/// Execution-sandbox provisioning failures. Fatal to the current run;
/// the shared session is only discarded on an explicit reset.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("sandbox creation failed: {reason}")]
    CreateFailed { reason: String },

    #[error("sandbox code execution failed: {reason}")]
    RunFailed { reason: String },

    #[error("sandbox destroy failed for {sandbox_id}: {reason}")]
    DestroyFailed { sandbox_id: String, reason: String },

    #[error("sandbox response missing field: {field}")]
    MalformedResponse { field: &'static str },
}

/// Tool gateway failures, split so callers can tell a dead wire from a
/// tool that answered with an error envelope.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network failure, timeout, or a non-2xx response with no parseable
    /// envelope. Never retried.
    #[error("gateway transport failure calling '{tool}': {reason}")]
    Transport { tool: String, reason: String },

    /// Well-formed envelope with the error field populated. Callers may
    /// fall back to another wire name instead of aborting.
    #[error("tool '{tool}' reported an error: {message}")]
    Tool { tool: String, message: String },

    /// Logical tool name has no entry in the routing table.
    #[error("no route configured for logical tool '{tool}'")]
    NoRoute { tool: String },

    /// The mandatory egress pass refused the outbound arguments. Nothing
    /// was transmitted.
    #[error("refused to transmit arguments: {0}")]
    Unsanitizable(#[from] SanitizationError),
}

impl GatewayError {
    /// True for tool-reported errors, the only kind eligible for
    /// candidate fallback.
    pub fn is_tool_reported(&self) -> bool {
        matches!(self, GatewayError::Tool { .. })
    }
}

/// Sanitizer failures. Messages must never carry unredacted content, so
/// variants hold structure only, never input text.
#[derive(Error, Debug)]
pub enum SanitizationError {
    #[error("object sanitization exceeded depth limit of {limit}")]
    DepthExceeded { limit: usize },
}

/// A single entity that failed graph-store validation. The batch it came
/// from continues without it.
#[derive(Error, Debug)]
pub enum StoreValidationError {
    #[error("entity id '{id}' violates the identifier grammar")]
    InvalidId { id: String },

    #[error("relationship type '{rel_type}' violates the relationship grammar")]
    InvalidRelType { rel_type: String },
}

/// Graph-store adapter failure: either the entity never made it past
/// validation, or the gateway call carrying the query failed.
#[derive(Error, Debug)]
pub enum GraphStoreError {
    #[error(transparent)]
    Validation(#[from] StoreValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Completion output that could not be parsed into the expected report
/// shape. Recovered locally by falling back to a minimal report.
#[derive(Error, Debug)]
#[error("analysis output did not parse as a report: {reason}")]
pub struct AnalysisParseError {
    pub reason: String,
}

/// The error that actually aborted a run state.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Sanitization(#[from] SanitizationError),

    #[error("completion service failure: {0}")]
    Completion(String),

    #[error("probe collected zero exchanges")]
    NoExchanges,

    #[error("probe output did not parse as exchanges: {reason}")]
    ProbeOutput { reason: String },
}

/// A failed audit run, tagged with the state that was executing.
#[derive(Error, Debug)]
#[error("audit failed during {state}: {source}")]
pub struct AuditError {
    pub state: AuditState,
    #[source]
    pub source: StageError,
}

impl AuditError {
    pub fn at(state: AuditState, source: impl Into<StageError>) -> Self {
        Self {
            state,
            source: source.into(),
        }
    }
}

/// Result alias for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;
