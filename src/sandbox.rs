// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Client for the execution-sandbox provisioning service.
//!
//! The sandbox is an external collaborator with create / run-code /
//! destroy semantics. Provisioning (create, destroy) is spoken here over
//! plain HTTP; code execution inside a provisioned sandbox is dispatched
//! as a `run_code` tool call through the gateway, keyed by the sandbox id
//! from the create response. Some deployments also return a per-session
//! gateway token; it is retained on the handle for operators that wire it
//! into the gateway configuration.
//!
//! The HTTP client carries a wall-clock timeout as the defensive upper
//! bound on sandbox lifetime: once exceeded, every in-flight call fails
//! with a transport-level error.

use serde_json::Value;
use std::time::Duration;

use crate::errors::SessionError;

/// A provisioned sandbox plus the gateway credentials derived from it.
/// Shared process-wide and reused across runs; see the orchestrator.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub sandbox_id: String,
    pub gateway_token: Option<String>,
}

pub struct SandboxClient {
    http: reqwest::Client,
    base_url: String,
}

impl SandboxClient {
    pub fn new(base_url: impl Into<String>, wall_clock_limit: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(wall_clock_limit)
            .build()
            .map_err(|e| SessionError::CreateFailed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Provision a fresh sandbox and derive gateway credentials from it.
    pub async fn create(&self) -> Result<SessionHandle, SessionError> {
        let response = self
            .http
            .post(format!("{}/sandboxes", self.base_url.trim_end_matches('/')))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SessionError::CreateFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::CreateFailed {
                reason: format!("provisioning service returned HTTP {}", status.as_u16()),
            });
        }

        let body: Value = response.json().await.map_err(|e| SessionError::CreateFailed {
            reason: e.to_string(),
        })?;

        let sandbox_id = body
            .get("id")
            .or_else(|| body.get("sandboxId"))
            .and_then(Value::as_str)
            .ok_or(SessionError::MalformedResponse { field: "id" })?
            .to_string();

        let gateway_token = body
            .get("gatewayToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(sandbox_id = %sandbox_id, "sandbox session created");
        Ok(SessionHandle {
            sandbox_id,
            gateway_token,
        })
    }

    /// Tear a sandbox down. Only called from an explicit session reset;
    /// never automatic on run failure.
    pub async fn destroy(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        let response = self
            .http
            .delete(format!(
                "{}/sandboxes/{}",
                self.base_url.trim_end_matches('/'),
                handle.sandbox_id
            ))
            .send()
            .await
            .map_err(|e| SessionError::DestroyFailed {
                sandbox_id: handle.sandbox_id.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SessionError::DestroyFailed {
                sandbox_id: handle.sandbox_id.clone(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }
        tracing::info!(sandbox_id = %handle.sandbox_id, "sandbox session destroyed");
        Ok(())
    }
}
