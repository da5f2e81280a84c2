// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Tool gateway client.
//!
//! One primitive: [`ToolGatewayClient::invoke`] — dispatch a logical tool
//! call through a single gateway endpoint. Built on the interception
//! pipeline with two mandatory aspects:
//!
//! 1. egress sanitization of the arguments (outermost, not bypassable),
//! 2. telemetry that logs `{tool, duration_ms, success}` and nothing else.
//!
//! The logical name is resolved through a routing table into ordered
//! wire-level candidates, because different gateway deployments expose the
//! same capability under different names. Candidates are tried in declared
//! order; a tool-reported error falls through to the next candidate, a
//! transport failure aborts immediately and is never retried.
//!
//! Responses arrive in several dialects (bare value, `{content:[..]}`,
//! `{text:..}`, JSON-RPC `{result|error}`), decoded into one tagged union
//! with a raw-value fallback rather than probed ad hoc.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{GatewayError, GatewayResult};
use crate::pipeline::{compose, handler_fn, Aspect, Next};
use crate::sanitizer::EgressSanitizer;
use crate::types::{ToolCall, ToolResult};

// ---------------------------------------------------------------------------
// Configuration & routing
// ---------------------------------------------------------------------------

/// Request envelope dialect spoken by the deployed gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeDialect {
    /// `POST {endpoint}/tools/{name}` with a flat `{toolName, arguments}` body.
    Flat,
    /// `POST {endpoint}` with a JSON-RPC 2.0 `tools/call` body.
    JsonRpc,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub dialect: EnvelopeDialect,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            dialect: EnvelopeDialect::JsonRpc,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_dialect(mut self, dialect: EnvelopeDialect) -> Self {
        self.dialect = dialect;
        self
    }
}

/// Logical tool name → ordered wire-level candidates.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<String, Vec<String>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "research".to_string(),
            vec![
                "research".to_string(),
                "web_search".to_string(),
                "deep_research".to_string(),
            ],
        );
        routes.insert(
            "graph_query".to_string(),
            vec![
                "graph_query".to_string(),
                "neo4j_query".to_string(),
                "cypher".to_string(),
            ],
        );
        routes.insert(
            "run_code".to_string(),
            vec![
                "run_code".to_string(),
                "execute_code".to_string(),
                "sandbox_exec".to_string(),
            ],
        );
        Self { routes }
    }
}

impl RoutingTable {
    pub fn insert(&mut self, logical: impl Into<String>, candidates: Vec<String>) {
        self.routes.insert(logical.into(), candidates);
    }

    /// Resolve a logical name. Unrouted names resolve to themselves so new
    /// tools work without table edits; an explicitly empty entry is a
    /// configuration error.
    pub fn resolve(&self, logical: &str) -> GatewayResult<Vec<String>> {
        match self.routes.get(logical) {
            Some(candidates) if candidates.is_empty() => Err(GatewayError::NoRoute {
                tool: logical.to_string(),
            }),
            Some(candidates) => Ok(candidates.clone()),
            None => Ok(vec![logical.to_string()]),
        }
    }
}

// ---------------------------------------------------------------------------
// Response envelope decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    #[allow(dead_code)]
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Known gateway response dialects, tried in order; `Raw` is the fallback.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GatewayEnvelope {
    JsonRpc {
        #[allow(dead_code)]
        jsonrpc: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<JsonRpcErrorBody>,
    },
    Content {
        content: Vec<ContentItem>,
        #[serde(default, rename = "isError")]
        is_error: bool,
    },
    Text {
        text: String,
    },
    BareError {
        error: String,
    },
    Raw(Value),
}

/// Join the text parts of a content array; fall back to the raw items if
/// the array carries no text.
fn join_content(items: Vec<ContentItem>) -> Value {
    let texts: Vec<String> = items
        .iter()
        .filter(|i| i.kind.as_deref().map_or(true, |k| k == "text"))
        .filter_map(|i| i.text.clone())
        .collect();
    if texts.is_empty() {
        Value::Null
    } else {
        Value::String(texts.join("\n"))
    }
}

/// Unwrap a JSON-RPC `result` that may itself carry a content/text wrapper.
fn unwrap_result_value(value: Value) -> Value {
    if let Ok(GatewayEnvelope::Content { content, is_error: false }) =
        serde_json::from_value::<GatewayEnvelope>(value.clone())
    {
        let joined = join_content(content);
        if !joined.is_null() {
            return joined;
        }
    }
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if value.as_object().map_or(false, |o| o.len() == 1) {
            return Value::String(text.to_string());
        }
    }
    value
}

/// Normalize a decoded envelope into one canonical payload value.
fn normalize(envelope: GatewayEnvelope, tool: &str) -> GatewayResult<Value> {
    match envelope {
        GatewayEnvelope::JsonRpc { error: Some(e), .. } => Err(GatewayError::Tool {
            tool: tool.to_string(),
            message: e.message,
        }),
        GatewayEnvelope::JsonRpc { result: Some(r), .. } => Ok(unwrap_result_value(r)),
        GatewayEnvelope::JsonRpc { .. } => Err(GatewayError::Transport {
            tool: tool.to_string(),
            reason: "JSON-RPC response carried neither result nor error".to_string(),
        }),
        GatewayEnvelope::Content { content, is_error } => {
            let joined = join_content(content);
            if is_error {
                Err(GatewayError::Tool {
                    tool: tool.to_string(),
                    message: joined.as_str().unwrap_or("tool error").to_string(),
                })
            } else {
                Ok(joined)
            }
        }
        GatewayEnvelope::Text { text } => Ok(Value::String(text)),
        GatewayEnvelope::BareError { error } => Err(GatewayError::Tool {
            tool: tool.to_string(),
            message: error,
        }),
        GatewayEnvelope::Raw(value) => Ok(value),
    }
}

// ---------------------------------------------------------------------------
// Mandatory aspects
// ---------------------------------------------------------------------------

/// Recursively sanitizes arguments before transmission. Composed
/// unconditionally as the outermost aspect; there is no constructor path
/// that omits it.
struct SanitizeArgs {
    sanitizer: Arc<EgressSanitizer>,
}

#[async_trait::async_trait]
impl Aspect for SanitizeArgs {
    async fn around(&self, mut call: ToolCall, next: Next) -> Result<ToolResult, GatewayError> {
        call.arguments = self.sanitizer.sanitize_value(&call.arguments)?;
        next(call).await
    }
}

/// Logs tool name, wall-clock duration, and success only. Payloads and
/// arguments are never logged at this layer.
struct Telemetry;

#[async_trait::async_trait]
impl Aspect for Telemetry {
    async fn around(&self, call: ToolCall, next: Next) -> Result<ToolResult, GatewayError> {
        let tool = call.tool_name.clone();
        let started = Instant::now();
        let outcome = next(call).await;
        tracing::info!(
            tool = %tool,
            duration_ms = started.elapsed().as_millis() as u64,
            success = outcome.is_ok(),
            "tool call completed"
        );
        outcome
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ToolGatewayClient {
    handler: Next,
    routes: RoutingTable,
}

impl ToolGatewayClient {
    pub fn new(config: GatewayConfig, sanitizer: Arc<EgressSanitizer>) -> GatewayResult<Self> {
        Self::with_routes(config, sanitizer, RoutingTable::default())
    }

    pub fn with_routes(
        config: GatewayConfig,
        sanitizer: Arc<EgressSanitizer>,
        routes: RoutingTable,
    ) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport {
                tool: "<client>".to_string(),
                reason: e.to_string(),
            })?;

        let base = wire_handler(http, config);
        let handler = compose(
            vec![
                Arc::new(SanitizeArgs { sanitizer }) as Arc<dyn Aspect>,
                Arc::new(Telemetry) as Arc<dyn Aspect>,
            ],
            base,
        );
        Ok(Self { handler, routes })
    }

    /// Dispatch one logical tool call, trying wire-name candidates in
    /// declared order. Returns the first candidate's payload that is not a
    /// tool-reported error; transport failures surface immediately.
    pub async fn invoke(&self, logical_tool: &str, arguments: Value) -> GatewayResult<Value> {
        let candidates = self.routes.resolve(logical_tool)?;
        let mut last_tool_error = None;

        for wire_name in candidates {
            let call = ToolCall {
                tool_name: wire_name.clone(),
                arguments: arguments.clone(),
            };
            match (self.handler)(call).await {
                Ok(result) => return Ok(result.payload),
                Err(err) if err.is_tool_reported() => {
                    tracing::debug!(
                        logical = logical_tool,
                        wire = %wire_name,
                        "candidate reported a tool error, trying next"
                    );
                    last_tool_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_tool_error.unwrap_or(GatewayError::NoRoute {
            tool: logical_tool.to_string(),
        }))
    }

    /// Convenience for callers that want the payload as prompt text.
    pub async fn invoke_text(&self, logical_tool: &str, arguments: Value) -> GatewayResult<String> {
        let payload = self.invoke(logical_tool, arguments).await?;
        Ok(ToolResult { payload }.as_text())
    }
}

/// Build the base handler that actually speaks to the gateway endpoint.
fn wire_handler(http: reqwest::Client, config: GatewayConfig) -> Next {
    let request_id = Arc::new(AtomicU64::new(1));
    handler_fn(move |call: ToolCall| {
        let http = http.clone();
        let config = config.clone();
        let request_id = Arc::clone(&request_id);
        async move {
            let tool = call.tool_name.clone();

            let (url, body) = match config.dialect {
                EnvelopeDialect::Flat => (
                    format!(
                        "{}/tools/{}",
                        config.endpoint.trim_end_matches('/'),
                        call.tool_name
                    ),
                    json!({
                        "toolName": call.tool_name,
                        "arguments": call.arguments,
                    }),
                ),
                EnvelopeDialect::JsonRpc => (
                    config.endpoint.clone(),
                    json!({
                        "jsonrpc": "2.0",
                        "id": request_id.fetch_add(1, Ordering::Relaxed),
                        "method": "tools/call",
                        "params": {
                            "name": call.tool_name,
                            "arguments": call.arguments,
                        },
                    }),
                ),
            };

            let mut request = http.post(&url).json(&body);
            if let Some(token) = &config.bearer_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| GatewayError::Transport {
                tool: tool.clone(),
                reason: e.to_string(),
            })?;

            let status = response.status();
            let text = response.text().await.map_err(|e| GatewayError::Transport {
                tool: tool.clone(),
                reason: e.to_string(),
            })?;

            let envelope: Option<GatewayEnvelope> = serde_json::from_str(&text).ok();
            match envelope {
                Some(env) if status.is_success() => {
                    normalize(env, &tool).map(|payload| ToolResult { payload })
                }
                // Non-2xx with a parseable envelope still counts as a
                // tool-reported error when the envelope says so.
                Some(env) => match normalize(env, &tool) {
                    Err(e @ GatewayError::Tool { .. }) => Err(e),
                    _ => Err(GatewayError::Transport {
                        tool,
                        reason: format!("gateway returned HTTP {}", status.as_u16()),
                    }),
                },
                None => Err(GatewayError::Transport {
                    tool,
                    reason: if status.is_success() {
                        "unparseable response body".to_string()
                    } else {
                        format!("gateway returned HTTP {}", status.as_u16())
                    },
                }),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> GatewayEnvelope {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn jsonrpc_result_normalizes_to_inner_value() {
        let env = decode(r#"{"jsonrpc":"2.0","id":1,"result":{"answer":42}}"#);
        let value = normalize(env, "t").unwrap();
        assert_eq!(value, json!({"answer": 42}));
    }

    #[test]
    fn jsonrpc_error_is_tool_reported() {
        let env = decode(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#);
        let err = normalize(env, "t").unwrap_err();
        assert!(matches!(err, GatewayError::Tool { message, .. } if message == "boom"));
    }

    #[test]
    fn content_array_joins_text_parts() {
        let env = decode(r#"{"content":[{"type":"text","text":"one"},{"type":"text","text":"two"}]}"#);
        assert_eq!(normalize(env, "t").unwrap(), json!("one\ntwo"));
    }

    #[test]
    fn content_with_error_flag_is_tool_reported() {
        let env = decode(r#"{"content":[{"type":"text","text":"denied"}],"isError":true}"#);
        let err = normalize(env, "t").unwrap_err();
        assert!(err.is_tool_reported());
    }

    #[test]
    fn text_and_raw_dialects_normalize() {
        assert_eq!(
            normalize(decode(r#"{"text":"hello"}"#), "t").unwrap(),
            json!("hello")
        );
        assert_eq!(normalize(decode(r#"[1,2,3]"#), "t").unwrap(), json!([1, 2, 3]));
        assert_eq!(normalize(decode(r#""bare""#), "t").unwrap(), json!("bare"));
    }

    #[test]
    fn jsonrpc_result_with_content_wrapper_unwraps() {
        let env = decode(
            r#"{"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"text","text":"inner"}]}}"#,
        );
        assert_eq!(normalize(env, "t").unwrap(), json!("inner"));
    }

    #[test]
    fn unrouted_logical_name_resolves_to_itself() {
        let table = RoutingTable::default();
        assert_eq!(table.resolve("brand_new").unwrap(), vec!["brand_new"]);
    }

    #[test]
    fn empty_route_entry_is_an_error() {
        let mut table = RoutingTable::default();
        table.insert("dead", Vec::new());
        assert!(matches!(
            table.resolve("dead"),
            Err(GatewayError::NoRoute { .. })
        ));
    }
}
