// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Nexus Bridge Node
//!
//! Entry point for the `nexus-node` binary. Parses CLI arguments, initializes
//! logging and metrics, assembles the bridge with its on-disk audit trail,
//! and serves the action endpoint.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the bridge node
//! - `sign`   : sign a payload offline and print it with its headers
//! - `status` : query a running node's `bridge_status`
//! - `version`: print build version information

mod api;
mod cli;
mod client;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use nexus_bridge::audit::{AuditSink, JsonLinesStore};
use nexus_bridge::config::BridgeConfig;
use nexus_bridge::signer::{sign, BridgeHeaders};
use nexus_bridge::wire::{OutgoingPayload, SignResponse};
use nexus_bridge::{AuditError, Bridge, SharedSecret};

use cli::{Commands, NexusNodeCli};
use metrics::NodeMetrics;

/// File names of the append-only logs inside the data directory.
const TRAFFIC_LOG: &str = "traffic.jsonl";
const INCIDENT_LOG: &str = "incidents.jsonl";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NexusNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Sign(args) => sign_payload(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the file config (if any) and layers the command-line flags on top.
fn load_config(args: &cli::RunArgs) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    config
        .allowed_domains
        .extend(args.allowed_domains.iter().cloned());
    if args.bridge_token.is_some() {
        config.bridge_token = args.bridge_token.clone();
    }
    config
        .validate_for_serving()
        .context("invalid bridge configuration (set --bridge-token or NEXUS_BRIDGE_TOKEN)")?;
    Ok(config)
}

/// Starts the bridge node: action endpoint and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "nexus_node=info,nexus_bridge=info,tower_http=debug",
        args.log_format,
    );

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        trust_forwarded = args.trust_forwarded,
        "starting nexus-node"
    );

    let config = load_config(&args)?;
    if config.allowed_domains.is_empty() {
        tracing::warn!("no allowed domains configured: requests carrying an Origin will be rejected");
    }

    // --- Audit trail ---
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data directory: {}", args.data_dir.display()))?;
    let traffic_path = args.data_dir.join(TRAFFIC_LOG);
    let incident_path = args.data_dir.join(INCIDENT_LOG);

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let failures = node_metrics.audit_persist_failures_total.clone();

    let audit = AuditSink::in_memory(config.recent_window)
        .with_traffic_store(Arc::new(JsonLinesStore::new(&traffic_path)))
        .with_incident_store(Arc::new(JsonLinesStore::new(&incident_path)))
        .with_failure_hook(Arc::new(move |_: &AuditError| failures.inc()));
    tracing::info!(
        traffic = %traffic_path.display(),
        incidents = %incident_path.display(),
        "audit trail opened"
    );

    // --- Bridge ---
    let bridge = Arc::new(
        Bridge::with_audit_sink(config, SharedSecret::from(args.secret.as_str()), audit)
            .context("failed to assemble bridge")?,
    );

    let app_state = api::AppState {
        bridge: Arc::clone(&bridge),
        metrics: Arc::clone(&node_metrics),
        trust_forwarded: args.trust_forwarded,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind bridge listener on {}", api_addr))?;
    tracing::info!("bridge endpoint listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            if let Err(e) = res {
                tracing::error!("bridge server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, flushing audit trail");
        }
    }

    bridge.audit().flush().await;
    tracing::info!(
        persistence_failures = bridge.audit().persistence_failures(),
        "nexus-node stopped"
    );
    Ok(())
}

/// Signs a payload read from a file (or stdin) and prints the signed
/// payload and its headers as JSON on stdout.
fn sign_payload(args: cli::SignArgs) -> Result<()> {
    logging::init_logging("warn", logging::LogFormat::Pretty);

    let raw = if args.input.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?
    };

    let outgoing: OutgoingPayload =
        serde_json::from_str(&raw).context("payload must be {direction, data, ...} JSON")?;
    let payload = outgoing.into_payload().context("invalid payload")?;

    let secret = SharedSecret::from(args.secret.as_str());
    anyhow::ensure!(!secret.is_empty(), "shared secret must not be empty");

    let signed_payload = sign(payload, &secret);
    let headers = BridgeHeaders::for_signed(&signed_payload, args.bridge_token.as_deref());
    let response = SignResponse {
        signed_payload,
        headers,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Asks a running node for its `bridge_status` and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let endpoint = client::NodeEndpoint::from_base_url(&args.url)?;
    let body = serde_json::json!({ "action": "bridge_status", "limit": args.limit }).to_string();
    let response = endpoint.post_json(&body, &args.bridge_token).await?;
    println!("{}", response);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("nexus-node   {}", env!("CARGO_PKG_VERSION"));
    println!("nexus-bridge {}", nexus_bridge::VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that branch never fires and the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
