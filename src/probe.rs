// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Probe step: drives the audit fixture's routes from inside the trusted
//! execution context and projects the raw exchanges into their sanitized
//! form.
//!
//! The probe itself runs as code inside the sandbox (dispatched through
//! the gateway's `run_code` tool), so raw exchanges only ever travel
//! between two trusted parties. Everything in this module that produces
//! outward-facing data goes through the egress sanitizer.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::errors::StageError;
use crate::sanitizer::{header_names, EgressSanitizer};
use crate::types::{BodyKind, HttpExchange, SanitizedExchange};

/// The fixture's route table. Fixed: arbitrary audit targets are a
/// non-goal.
pub const FIXTURE_ROUTES: &[(&str, &str)] = &[
    ("GET", "/health"),
    ("GET", "/api/users/1"),
    ("GET", "/api/orders"),
    ("GET", "/search?q=ping"),
    ("GET", "/api/export"),
];

/// Code executed in the sandbox to start the fixture service.
pub fn fixture_start_code(fixture_dir: &str) -> String {
    format!("import subprocess, time\nsubprocess.Popen(['python3', '{fixture_dir}/app.py'])\ntime.sleep(1.5)\nprint('started')")
}

/// Code executed in the sandbox to probe every fixture route and emit the
/// raw exchanges as one JSON array on stdout.
pub fn probe_code(fixture_base: &str) -> String {
    let routes: Vec<String> = FIXTURE_ROUTES
        .iter()
        .map(|(method, path)| format!("('{method}', '{path}')"))
        .collect();
    format!(
        r#"import json, urllib.request
base = '{base}'
routes = [{routes}]
exchanges = []
for method, path in routes:
    req = urllib.request.Request(base + path, method=method)
    try:
        resp = urllib.request.urlopen(req, timeout=10)
        body = resp.read().decode('utf-8', 'replace')
        headers = dict(resp.headers.items())
    except Exception as e:
        body = getattr(e, 'read', lambda: b'')().decode('utf-8', 'replace') if hasattr(e, 'read') else str(e)
        headers = dict(getattr(e, 'headers', None) or {{}})
    exchanges.append({{
        'method': method,
        'url': base + path,
        'httpVersion': 'HTTP/1.1',
        'headers': headers,
        'body': body,
    }})
print(json.dumps(exchanges))
"#,
        base = fixture_base.trim_end_matches('/'),
        routes = routes.join(", "),
    )
}

/// Parse the probe tool output into raw exchanges. The sandbox echoes
/// logging around the JSON, so locate the array the same way scan output
/// is located in noisy stdout.
pub fn parse_exchanges(output: &str) -> Result<Vec<HttpExchange>, StageError> {
    let trimmed = output.trim();
    let candidate = if trimmed.starts_with('[') {
        trimmed.to_string()
    } else {
        match trimmed.rfind("\n[") {
            Some(idx) => trimmed[idx..].trim().to_string(),
            None => {
                return Err(StageError::ProbeOutput {
                    reason: "no JSON array in probe output".to_string(),
                })
            }
        }
    };
    serde_json::from_str(&candidate).map_err(|e| StageError::ProbeOutput {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Sanitized projection
// ---------------------------------------------------------------------------

static NUMERIC_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static UUID_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

const PREVIEW_BUDGET: usize = 160;

/// Normalize a URL into a template: id-like path segments become `{id}`,
/// query values are dropped in favor of their parameter names.
pub fn url_template(raw: &str, sanitizer: &EgressSanitizer) -> String {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        // Not parseable as a URL: all we can safely emit is redacted text.
        Err(_) => return sanitizer.sanitize_text(raw),
    };

    let path: String = parsed
        .path()
        .split('/')
        .map(|segment| {
            if NUMERIC_SEGMENT_RE.is_match(segment) || UUID_SEGMENT_RE.is_match(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    let params: Vec<String> = parsed
        .query_pairs()
        .map(|(name, _)| format!("{name}={{{name}}}"))
        .collect();

    if params.is_empty() {
        path
    } else {
        format!("{}?{}", path, params.join("&"))
    }
}

/// Coarse body classification from the content type, falling back to
/// sniffing the payload itself.
pub fn classify_body(content_type: Option<&str>, body: &str) -> BodyKind {
    if body.is_empty() {
        return BodyKind::Empty;
    }
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("json") {
            return BodyKind::Json;
        }
        if ct.contains("html") {
            return BodyKind::Html;
        }
        if ct.starts_with("text/") {
            return BodyKind::Text;
        }
        if ct.contains("octet-stream") || ct.starts_with("image/") || ct.starts_with("audio/") {
            return BodyKind::Binary;
        }
    }
    let head = body.trim_start();
    if head.starts_with('{') || head.starts_with('[') {
        if serde_json::from_str::<serde_json::Value>(body).is_ok() {
            return BodyKind::Json;
        }
    }
    if head.to_ascii_lowercase().starts_with("<!doctype html") || head.starts_with("<html") {
        return BodyKind::Html;
    }
    BodyKind::Unknown
}

/// Truncate at the preview budget without splitting a char.
fn truncate_preview(body: &str) -> &str {
    if body.len() <= PREVIEW_BUDGET {
        return body;
    }
    let mut end = PREVIEW_BUDGET;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Project a raw exchange into the only form allowed past the egress
/// boundary. The raw exchange is consumed by value so the caller cannot
/// keep it around after sanitization.
pub fn sanitize_exchange(raw: HttpExchange, sanitizer: &EgressSanitizer) -> SanitizedExchange {
    let content_type = raw
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str());

    SanitizedExchange {
        method: raw.method.clone(),
        url_template: url_template(&raw.url, sanitizer),
        header_names: header_names(raw.headers.keys()),
        body_kind: classify_body(content_type, &raw.body),
        body_preview: sanitizer.sanitize_text(truncate_preview(&raw.body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sanitizer() -> EgressSanitizer {
        EgressSanitizer::default()
    }

    #[test]
    fn url_template_replaces_ids_and_query_values() {
        let s = sanitizer();
        assert_eq!(
            url_template("http://fixture.local/api/users/42?sort=asc", &s),
            "/api/users/{id}?sort={sort}"
        );
        assert_eq!(
            url_template(
                "http://h/items/550e8400-e29b-41d4-a716-446655440000",
                &s
            ),
            "/items/{id}"
        );
        assert_eq!(url_template("http://h/plain/path", &s), "/plain/path");
    }

    #[test]
    fn unparseable_url_is_sanitized_not_echoed() {
        let s = sanitizer();
        let out = url_template("not a url with ssn 123-45-6789", &s);
        assert!(!out.contains("123-45-6789"));
    }

    #[test]
    fn body_classification() {
        assert_eq!(classify_body(None, ""), BodyKind::Empty);
        assert_eq!(
            classify_body(Some("application/json; charset=utf-8"), "{\"a\":1}"),
            BodyKind::Json
        );
        assert_eq!(classify_body(Some("text/html"), "<html>"), BodyKind::Html);
        assert_eq!(classify_body(Some("text/plain"), "hi"), BodyKind::Text);
        assert_eq!(
            classify_body(Some("application/octet-stream"), "x"),
            BodyKind::Binary
        );
        assert_eq!(classify_body(None, "{\"sniffed\": true}"), BodyKind::Json);
        assert_eq!(classify_body(None, "<!DOCTYPE html><p>"), BodyKind::Html);
        assert_eq!(classify_body(None, "???"), BodyKind::Unknown);
    }

    #[test]
    fn sanitized_exchange_carries_no_header_values_or_raw_pii() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Authorization".to_string(), "Bearer topsecret".to_string());
        let raw = HttpExchange {
            method: "GET".to_string(),
            url: "http://fixture.local/api/users/7".to_string(),
            http_version: "HTTP/1.1".to_string(),
            headers,
            body: "{\"email\": \"leak@example.com\", \"ssn\": \"123-45-6789\"}".to_string(),
        };
        let sanitized = sanitize_exchange(raw, &sanitizer());

        assert_eq!(sanitized.url_template, "/api/users/{id}");
        assert_eq!(
            sanitized.header_names,
            vec!["authorization", "content-type"]
        );
        assert_eq!(sanitized.body_kind, BodyKind::Json);
        assert!(!sanitized.body_preview.contains("topsecret"));
        assert!(!sanitized.body_preview.contains("leak@example.com"));
        assert!(!sanitized.body_preview.contains("123-45-6789"));
    }

    #[test]
    fn preview_is_truncated_on_char_boundaries() {
        let body = "å".repeat(200);
        let preview = truncate_preview(&body);
        assert!(preview.len() <= PREVIEW_BUDGET);
        assert!(preview.chars().all(|c| c == 'å'));
    }

    #[test]
    fn exchanges_parse_from_noisy_output() {
        let noisy = "starting probe\ninfo: 5 routes\n[{\"method\":\"GET\",\"url\":\"http://f/x\",\"headers\":{},\"body\":\"\"}]";
        let exchanges = parse_exchanges(noisy).unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].method, "GET");
        assert_eq!(exchanges[0].http_version, "HTTP/1.1");
    }

    #[test]
    fn garbage_probe_output_is_a_typed_error() {
        let err = parse_exchanges("no json at all").unwrap_err();
        assert!(matches!(err, StageError::ProbeOutput { .. }));
    }
}
