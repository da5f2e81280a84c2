// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tool Gateway Tests
 * Tests for dialect handling, candidate fallback, and egress sanitization
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tarkastaja_auditor::errors::GatewayError;
use tarkastaja_auditor::gateway::{EnvelopeDialect, GatewayConfig, ToolGatewayClient};
use tarkastaja_auditor::sanitizer::EgressSanitizer;

fn client(server: &MockServer, dialect: EnvelopeDialect) -> ToolGatewayClient {
    let config = GatewayConfig::new(server.uri()).with_dialect(dialect);
    ToolGatewayClient::new(config, Arc::new(EgressSanitizer::default())).unwrap()
}

#[tokio::test]
async fn flat_dialect_invoke_returns_normalized_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/research"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello"})))
        .mount(&server)
        .await;

    let gateway = client(&server, EnvelopeDialect::Flat);
    let text = gateway
        .invoke_text("research", json!({"query": "q"}))
        .await
        .unwrap();
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn jsonrpc_dialect_unwraps_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("tools/call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "inner"}]},
        })))
        .mount(&server)
        .await;

    let gateway = client(&server, EnvelopeDialect::JsonRpc);
    let value = gateway.invoke("research", json!({"query": "q"})).await.unwrap();
    assert_eq!(value, json!("inner"));
}

#[tokio::test]
async fn tool_error_falls_through_to_next_candidate() {
    let server = MockServer::start().await;

    // First wire name answers with a tool-reported error.
    Mock::given(method("POST"))
        .and(path("/tools/graph_query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "unknown tool"})))
        .expect(1)
        .mount(&server)
        .await;

    // Second wire name succeeds.
    Mock::given(method("POST"))
        .and(path("/tools/neo4j_query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "rows"})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client(&server, EnvelopeDialect::Flat);
    let value = gateway
        .invoke("graph_query", json!({"query": "MATCH (n) RETURN n"}))
        .await
        .unwrap();
    assert_eq!(value, json!("rows"));
}

#[tokio::test]
async fn transport_failure_aborts_without_trying_next_candidate() {
    let server = MockServer::start().await;

    // Non-2xx with an unparseable body is a transport failure.
    Mock::given(method("POST"))
        .and(path("/tools/graph_query"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/tools/neo4j_query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "rows"})))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = client(&server, EnvelopeDialect::Flat);
    let err = gateway
        .invoke("graph_query", json!({"query": "MATCH (n) RETURN n"}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));

    server.verify().await;
}

#[tokio::test]
async fn all_candidates_tool_erroring_surfaces_the_last_error() {
    let server = MockServer::start().await;

    for wire in ["research", "web_search", "deep_research"] {
        Mock::given(method("POST"))
            .and(path(format!("/tools/{wire}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": format!("{wire} unavailable")})),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let gateway = client(&server, EnvelopeDialect::Flat);
    let err = gateway.invoke("research", json!({"query": "q"})).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Tool { ref message, .. } if message == "deep_research unavailable"
    ));

    server.verify().await;
}

#[tokio::test]
async fn arguments_are_sanitized_before_transmission() {
    let server = MockServer::start().await;

    // The mock only matches the redacted form; an unsanitized body would
    // miss every mock and fail the call.
    Mock::given(method("POST"))
        .and(path("/tools/echo"))
        .and(body_string_contains("[REDACTED-EMAIL]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client(&server, EnvelopeDialect::Flat);
    let text = gateway
        .invoke_text("echo", json!({"note": "reach me at leak@example.com"}))
        .await
        .unwrap();
    assert_eq!(text, "ok");

    server.verify().await;
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let config = GatewayConfig::new(uri).with_dialect(EnvelopeDialect::Flat);
    let gateway = ToolGatewayClient::new(config, Arc::new(EgressSanitizer::default())).unwrap();
    let err = gateway.invoke("research", json!({"query": "q"})).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));
}
