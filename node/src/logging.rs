//! # Structured Logging
//!
//! Sets up the global `tracing` subscriber. `RUST_LOG` wins over the
//! built-in filter when set.
//!
//! Everything goes to stderr: `nexus-node sign` prints the signed payload on
//! stdout and nothing may interleave with it.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format, selected with `--log-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output with source locations.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Builds the filter: `RUST_LOG` if it parses, otherwise `default_directives`.
fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Installs the global subscriber.
///
/// Call once, before the first log line. A second call panics inside
/// `tracing-subscriber`.
///
/// ```text
/// RUST_LOG=nexus_bridge=debug nexus-node run --log-format json
/// ```
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(default_directives));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    tracing::debug!(?format, "logging initialized");
}
