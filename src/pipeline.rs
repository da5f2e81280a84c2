// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Interception pipeline for tool calls.
//!
//! An aspect wraps a continuation: it may rewrite the call before handing
//! it on, observe the response, short-circuit with a fabricated response,
//! or let errors from downstream propagate unmodified. [`compose`] folds an
//! ordered aspect list right-to-left into a single handler, so the first
//! aspect in the list is outermost: its pre-logic runs first and its
//! post-logic runs last. The composed handler has the same shape as the
//! base handler, so callers cannot tell the difference.
//!
//! Aspects hold no per-call state, which keeps each one unit-testable
//! against a stub continuation.

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::types::{ToolCall, ToolResult};

/// The continuation an aspect hands the (possibly rewritten) call to.
pub type Next = Arc<dyn Fn(ToolCall) -> BoxFuture<'static, Result<ToolResult, GatewayError>> + Send + Sync>;

/// One interception layer around a tool call.
#[async_trait::async_trait]
pub trait Aspect: Send + Sync {
    async fn around(&self, call: ToolCall, next: Next) -> Result<ToolResult, GatewayError>;
}

/// Fold the aspect list into one handler, first aspect outermost.
pub fn compose(aspects: Vec<Arc<dyn Aspect>>, base: Next) -> Next {
    aspects.into_iter().rev().fold(base, |next, aspect| {
        Arc::new(move |call: ToolCall| {
            let aspect = Arc::clone(&aspect);
            let next = Arc::clone(&next);
            Box::pin(async move { aspect.around(call, next).await })
                as BoxFuture<'static, Result<ToolResult, GatewayError>>
        })
    })
}

/// Wrap a plain async closure as a base handler.
pub fn handler_fn<F, Fut>(f: F) -> Next
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ToolResult, GatewayError>> + Send + 'static,
{
    Arc::new(move |call| Box::pin(f(call)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Appends a marker to the arguments on the way in and to the payload
    /// on the way out, so composition order is observable.
    struct Tagging {
        tag: &'static str,
    }

    #[async_trait::async_trait]
    impl Aspect for Tagging {
        async fn around(&self, mut call: ToolCall, next: Next) -> Result<ToolResult, GatewayError> {
            let trail = format!(
                "{}>{}",
                call.arguments["trail"].as_str().unwrap_or(""),
                self.tag
            );
            call.arguments["trail"] = json!(trail);
            let mut result = next(call).await?;
            let out = format!(
                "{}<{}",
                result.payload["trail"].as_str().unwrap_or(""),
                self.tag
            );
            result.payload["trail"] = json!(out);
            Ok(result)
        }
    }

    /// Declines to call `next`, fabricating a response.
    struct ShortCircuit;

    #[async_trait::async_trait]
    impl Aspect for ShortCircuit {
        async fn around(&self, _call: ToolCall, _next: Next) -> Result<ToolResult, GatewayError> {
            Ok(ToolResult {
                payload: json!({"fabricated": true}),
            })
        }
    }

    fn stub_base() -> Next {
        handler_fn(|call: ToolCall| async move {
            Ok(ToolResult {
                payload: json!({"trail": call.arguments["trail"].as_str().unwrap_or("")}),
            })
        })
    }

    #[tokio::test]
    async fn first_aspect_is_outermost() {
        let composed = compose(
            vec![
                Arc::new(Tagging { tag: "a" }),
                Arc::new(Tagging { tag: "b" }),
            ],
            stub_base(),
        );
        let result = composed(ToolCall {
            tool_name: "t".into(),
            arguments: json!({"trail": ""}),
        })
        .await
        .unwrap();
        // Pre-logic a then b; post-logic b then a.
        assert_eq!(result.payload["trail"], json!(">a>b<b<a"));
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream() {
        let composed = compose(
            vec![Arc::new(ShortCircuit)],
            handler_fn(|_call| async move {
                panic!("base handler must not run");
                #[allow(unreachable_code)]
                Ok(ToolResult {
                    payload: json!(null),
                })
            }),
        );
        let result = composed(ToolCall {
            tool_name: "t".into(),
            arguments: json!({}),
        })
        .await
        .unwrap();
        assert_eq!(result.payload["fabricated"], json!(true));
    }

    #[tokio::test]
    async fn errors_propagate_unmodified() {
        let composed = compose(
            vec![Arc::new(Tagging { tag: "a" })],
            handler_fn(|call: ToolCall| async move {
                Err(GatewayError::Transport {
                    tool: call.tool_name,
                    reason: "down".into(),
                })
            }),
        );
        let err = composed(ToolCall {
            tool_name: "t".into(),
            arguments: json!({"trail": ""}),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }

    #[tokio::test]
    async fn composed_handler_matches_base_shape() {
        let bare = stub_base();
        let composed = compose(Vec::new(), stub_base());
        let call = ToolCall {
            tool_name: "t".into(),
            arguments: json!({"trail": "x"}),
        };
        let a = bare(call.clone()).await.unwrap();
        let b = composed(call).await.unwrap();
        assert_eq!(a.payload, b.payload);
    }
}
