//! # CLI Interface
//!
//! Defines the command-line argument structure for `nexus-node` using
//! `clap` derive. Supports four subcommands: `run`, `sign`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Nexus signed message bridge node.
///
/// Fronts one side of the bridge: verifies incoming signed payloads, signs
/// outgoing ones, keeps the audit trail, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "nexus-node",
    about = "Nexus signed message bridge node",
    version,
    propagate_version = true
)]
pub struct NexusNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the bridge node.
    Run(RunArgs),
    /// Sign a payload offline and print it with its transport headers.
    Sign(SignArgs),
    /// Query the status of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a bridge configuration file (JSON).
    ///
    /// Missing fields take their defaults. Command-line domains and token
    /// are applied on top.
    #[arg(long, short = 'c', env = "NEXUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for the append-only audit and incident logs.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "NEXUS_DATA_DIR", default_value = "./nexus-data")]
    pub data_dir: PathBuf,

    /// Port for the bridge endpoint.
    #[arg(long, env = "NEXUS_PORT", default_value_t = 8740)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "NEXUS_METRICS_PORT", default_value_t = 8742)]
    pub metrics_port: u16,

    /// Shared HMAC secret.
    ///
    /// **Never pass this flag in production**: use the environment variable
    /// so the secret stays out of shell history and process listings.
    #[arg(long, env = "NEXUS_BRIDGE_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Domain allowed to originate traffic. Repeat for several.
    #[arg(long = "allowed-domain", value_name = "DOMAIN")]
    pub allowed_domains: Vec<String>,

    /// Bridge identity token expected in `x-bridge-token`.
    #[arg(long, env = "NEXUS_BRIDGE_TOKEN", hide_env_values = true)]
    pub bridge_token: Option<String>,

    /// Take the source IP from the first `x-forwarded-for` hop.
    ///
    /// Only enable behind a reverse proxy that overwrites the header.
    #[arg(long)]
    pub trust_forwarded: bool,

    /// Log output format.
    #[arg(long, env = "NEXUS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `sign` subcommand.
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// JSON file holding `{direction, data, transactionId?, timestamp?}`.
    /// Use `-` to read from stdin.
    #[arg(long, short = 'i', default_value = "-")]
    pub input: PathBuf,

    /// Shared HMAC secret.
    #[arg(long, env = "NEXUS_BRIDGE_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Token to put in the `x-bridge-token` header instead of the placeholder.
    #[arg(long, env = "NEXUS_BRIDGE_TOKEN", hide_env_values = true)]
    pub bridge_token: Option<String>,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node.
    #[arg(long, default_value = "http://127.0.0.1:8740")]
    pub url: String,

    /// How many recent traffic entries to fetch.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Bridge identity token of the queried node.
    #[arg(long, env = "NEXUS_BRIDGE_TOKEN", hide_env_values = true)]
    pub bridge_token: String,
}
