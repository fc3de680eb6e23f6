use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::ExposeSecret;

use parley_ai::{BoundedResponder, DisabledResponder, OpenAiResponder, Responder};
use parley_core::auth::SignedTokenVerifier;
use parley_hub::Hub;
use parley_server::Config;
use parley_store::{Database, MessageArchive};
use parley_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time session and broadcast engine")]
struct Args {
    /// Listen port (overrides PARLEY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Message archive path (overrides PARLEY_DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.db_path.is_some() {
        config.db_path = args.db_path;
    }
    if args.json_logs {
        config.log_json = true;
    }

    if let Err(e) = init_telemetry(&TelemetryConfig {
        json_output: config.log_json,
        ..TelemetryConfig::default()
    }) {
        eprintln!("telemetry init failed: {e}");
    }

    tracing::info!("starting parley");

    let auth_secret = config
        .auth_secret
        .as_ref()
        .context("PARLEY_AUTH_SECRET must be set")?;
    let verifier = Arc::new(SignedTokenVerifier::new(auth_secret.expose_secret()));

    // The archive is a best-effort side channel; a broken path is not fatal.
    let archive = match &config.db_path {
        Some(path) => match Database::open(path) {
            Ok(db) => Some(Arc::new(MessageArchive::new(db))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "archive unavailable");
                None
            }
        },
        None => None,
    };

    let responder: Arc<dyn Responder> = match &config.openai_api_key {
        Some(key) => {
            let inner = match &config.openai_base_url {
                Some(base_url) => OpenAiResponder::with_base_url(
                    key.expose_secret(),
                    config.model.clone(),
                    base_url.as_str(),
                ),
                None => OpenAiResponder::new(key.expose_secret(), config.model.clone()),
            };
            Arc::new(BoundedResponder::new(inner, config.responder_timeout()))
        }
        None => {
            tracing::warn!("no API key configured, assistant turns will use the fallback message");
            Arc::new(DisabledResponder)
        }
    };

    let hub = Arc::new(Hub::new(config.hub_config(), responder, verifier, archive));

    let handle = parley_server::start(&config, hub)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}
