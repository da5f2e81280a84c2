// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tarkastaja - HTTP Compliance Auditor
 * Runs one sequential audit of the built-in fixture service
 *
 * © 2026 Bountyy Oy
 */

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use tarkastaja_auditor::completion::AnthropicCompletion;
use tarkastaja_auditor::config::AuditorConfig;
use tarkastaja_auditor::gateway::{GatewayConfig, ToolGatewayClient};
use tarkastaja_auditor::orchestrator::{user_visible_failure, AuditContext, Auditor};
use tarkastaja_auditor::sandbox::SandboxClient;
use tarkastaja_auditor::sanitizer::EgressSanitizer;

#[derive(Parser, Debug)]
#[command(name = "tarkastaja")]
#[command(about = "HTTP compliance auditor", long_about = None)]
struct Args {
    /// Optional audit question to focus the analysis on
    #[arg(long)]
    question: Option<String>,

    /// Destroy the sandbox session after the run
    #[arg(long)]
    teardown: bool,

    /// Verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    info!("Tarkastaja Compliance Auditor v1.0.0 - Starting");

    let config = AuditorConfig::from_env()?;

    let sanitizer = Arc::new(EgressSanitizer::default());

    let mut gateway_config = GatewayConfig::new(config.gateway_endpoint.clone())
        .with_dialect(config.gateway_dialect);
    gateway_config.timeout = config.gateway_timeout();
    if let Some(token) = &config.gateway_token {
        gateway_config = gateway_config.with_bearer_token(token.clone());
    }
    let gateway = Arc::new(ToolGatewayClient::new(gateway_config, Arc::clone(&sanitizer))?);

    let api_key = config
        .anthropic_api_key
        .clone()
        .context("ANTHROPIC_API_KEY is required")?;
    let completion = Arc::new(AnthropicCompletion::new(
        api_key,
        config.completion_model.clone(),
    )?);

    let sandbox = SandboxClient::new(config.sandbox_base_url.clone(), config.sandbox_wall_clock())?;

    let auditor = Auditor::new(
        gateway,
        sandbox,
        completion,
        Arc::clone(&sanitizer),
        chrono::Duration::seconds(config.catalog_ttl_secs),
        config.fixture_dir.clone(),
        config.fixture_base.clone(),
    );

    let mut ctx = AuditContext::new();
    let outcome = auditor.run_audit(&ctx, args.question.as_deref()).await;

    if args.teardown {
        if let Err(e) = auditor.reset_session(&mut ctx).await {
            error!(error = %e, "session teardown failed");
        }
    }

    match outcome {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            let rendered = user_visible_failure(&e, &sanitizer);
            error!("{rendered}");
            anyhow::bail!(rendered)
        }
    }
}
