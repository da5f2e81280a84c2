// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Hosted completion endpoint abstraction: message list in, text out.
//!
//! Kept deliberately narrow — the auditor needs exactly one capability,
//! a single-turn completion with a system preamble. Deployments swap the
//! backing service by providing another [`CompletionProvider`].

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;

#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one system + user turn, get the completion text back.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Provider name for display.
    fn name(&self) -> &str;

    /// Model identifier for display.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Anthropic-compatible HTTP provider
// ---------------------------------------------------------------------------

pub struct AnthropicCompletion {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    max_tokens: u32,
}

impl AnthropicCompletion {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        Self::with_base_url(api_key, model, "https://api.anthropic.com".to_string())
    }

    pub fn with_base_url(api_key: String, model: Option<String>, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client for completion API")?;

        Ok(Self {
            api_key,
            model: model.unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            base_url,
            client,
            max_tokens: 4096,
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for AnthropicCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to completion API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("completion API error: HTTP {}", status.as_u16());
        }

        let api_response: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse completion API response")?;

        let text = api_response["content"]
            .as_array()
            .and_then(|blocks| {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            })
            .context("Missing text content in completion response")?;

        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
