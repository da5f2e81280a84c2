// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Runtime configuration, resolved from environment variables with
//! conservative defaults. Only the gateway endpoint and the completion
//! API key are required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::gateway::EnvelopeDialect;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditorConfig {
    /// Tool gateway endpoint, e.g. `https://gateway.internal/mcp`.
    pub gateway_endpoint: String,
    pub gateway_token: Option<String>,
    pub gateway_dialect: EnvelopeDialect,
    pub gateway_timeout_secs: u64,

    /// Sandbox provisioning service base URL.
    pub sandbox_base_url: String,
    /// Wall-clock upper bound on any single sandbox HTTP call.
    pub sandbox_wall_clock_secs: u64,

    pub anthropic_api_key: Option<String>,
    pub completion_model: Option<String>,

    /// Directory inside the sandbox holding the audit fixture service.
    pub fixture_dir: String,
    /// Base URL the fixture listens on, as seen from inside the sandbox.
    /// Hostname form only: the egress pass redacts IPv4 literals, so a
    /// dotted-quad base would not survive transmission of the probe code.
    pub fixture_base: String,

    /// Risk-category catalog cache window, in seconds.
    pub catalog_ttl_secs: i64,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            gateway_endpoint: "http://localhost:3000/mcp".to_string(),
            gateway_token: None,
            gateway_dialect: EnvelopeDialect::JsonRpc,
            gateway_timeout_secs: 60,
            sandbox_base_url: "http://localhost:8900".to_string(),
            sandbox_wall_clock_secs: 300,
            anthropic_api_key: None,
            completion_model: None,
            fixture_dir: "/opt/fixture".to_string(),
            fixture_base: "http://localhost:8080".to_string(),
            catalog_ttl_secs: 3600,
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AuditorConfig {
    /// Resolve configuration from `TARKASTAJA_*` environment variables,
    /// falling back to the defaults above for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let dialect = match env_or(
            "TARKASTAJA_GATEWAY_DIALECT",
            "jsonrpc".to_string(),
        )
        .to_lowercase()
        .as_str()
        {
            "flat" => EnvelopeDialect::Flat,
            "jsonrpc" => EnvelopeDialect::JsonRpc,
            other => anyhow::bail!("unknown gateway dialect '{other}' (expected flat or jsonrpc)"),
        };

        let gateway_timeout_secs = env_or(
            "TARKASTAJA_GATEWAY_TIMEOUT_SECS",
            defaults.gateway_timeout_secs.to_string(),
        )
        .parse::<u64>()
        .context("TARKASTAJA_GATEWAY_TIMEOUT_SECS must be an integer")?;

        let sandbox_wall_clock_secs = env_or(
            "TARKASTAJA_SANDBOX_WALL_CLOCK_SECS",
            defaults.sandbox_wall_clock_secs.to_string(),
        )
        .parse::<u64>()
        .context("TARKASTAJA_SANDBOX_WALL_CLOCK_SECS must be an integer")?;

        let catalog_ttl_secs = env_or(
            "TARKASTAJA_CATALOG_TTL_SECS",
            defaults.catalog_ttl_secs.to_string(),
        )
        .parse::<i64>()
        .context("TARKASTAJA_CATALOG_TTL_SECS must be an integer")?;

        Ok(Self {
            gateway_endpoint: env_or("TARKASTAJA_GATEWAY_ENDPOINT", defaults.gateway_endpoint),
            gateway_token: env_opt("TARKASTAJA_GATEWAY_TOKEN"),
            gateway_dialect: dialect,
            gateway_timeout_secs,
            sandbox_base_url: env_or("TARKASTAJA_SANDBOX_URL", defaults.sandbox_base_url),
            sandbox_wall_clock_secs,
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            completion_model: env_opt("TARKASTAJA_COMPLETION_MODEL"),
            fixture_dir: env_or("TARKASTAJA_FIXTURE_DIR", defaults.fixture_dir),
            fixture_base: env_or("TARKASTAJA_FIXTURE_BASE", defaults.fixture_base),
            catalog_ttl_secs,
        })
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn sandbox_wall_clock(&self) -> Duration {
        Duration::from_secs(self.sandbox_wall_clock_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_hostname_form() {
        let config = AuditorConfig::default();
        assert!(config.fixture_base.starts_with("http://localhost"));
        assert_eq!(config.gateway_dialect, EnvelopeDialect::JsonRpc);
        assert_eq!(config.gateway_timeout(), Duration::from_secs(60));
    }
}
