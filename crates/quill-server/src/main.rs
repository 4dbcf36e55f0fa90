//! Quill gateway: streams chat completions from Azure OpenAI to the editor.

mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use quill_api::{ApiClient, AzureProvider, Deployments, RetryConfig};
use quill_config::{CliOverrides, GatewayConfig};
use quill_context::{BpeEstimator, TokenEstimator, encoding_for_model};
use quill_core::Gateway;
use quill_types::ModelTier;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::routes::{AppState, router};

#[derive(Parser)]
#[command(name = "quill", version, about = "Streaming chat-completion gateway for the Quill editor")]
struct Cli {
    /// Config file (defaults to ~/.quill/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(long)]
    listen: Option<String>,

    /// API key (overrides AZURE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Token budget for the conversation window
    #[arg(long)]
    token_budget: Option<usize>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = GatewayConfig::load(CliOverrides {
        config_path: cli.config,
        api_key: cli.api_key,
        listen: cli.listen,
        token_budget: cli.token_budget,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let estimator = BpeEstimator::new(&config.encoding, config.margin_percent)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    for (tier, model, expected) in tokenizer_mismatches(&config.deployments, estimator.encoding()) {
        warn!(
            %tier,
            model,
            expected,
            configured = estimator.encoding(),
            "Token estimates use a different encoding than the deployed model"
        );
    }

    let client = ApiClient::new(&config.api_key, &config.base_url, config.deployments.clone())
        .context("Failed to create API client")?
        .with_api_version(&config.api_version)
        .with_retry_config(RetryConfig {
            max_retries: config.max_retries,
            ..RetryConfig::default()
        })
        .with_timeout(config.timeout);

    for (tier, deployment) in config.deployments.iter() {
        info!(%tier, url = %client.endpoint(tier), model = %deployment.model, "Upstream deployment");
    }

    let gateway = Gateway::new(
        Arc::new(AzureProvider::new(client)),
        Arc::new(estimator),
        config.token_budget,
        config.tiers,
    );
    let shutdown = CancellationToken::new();
    let app = router(AppState {
        gateway: Arc::new(gateway),
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen))?;
    info!(
        "Quill v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        config.listen
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;

    info!("Quill shutdown complete");
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Deployments whose model is known to use a different encoding than the
/// estimator, as `(tier, model, expected encoding)`.
fn tokenizer_mismatches<'a>(
    deployments: &'a Deployments,
    encoding: &str,
) -> Vec<(ModelTier, &'a str, &'static str)> {
    deployments
        .iter()
        .filter_map(|(tier, deployment)| {
            let expected = encoding_for_model(&deployment.model)?;
            (expected != encoding).then_some((tier, deployment.model.as_str(), expected))
        })
        .collect()
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
