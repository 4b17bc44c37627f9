//! # Prometheus Metrics
//!
//! Exposes bridge metrics. Scraped by Prometheus at the `/metrics` HTTP
//! endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `nexus` namespace so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use nexus_bridge::{VerificationResult, VerificationStatus};

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers and the audit failure hook.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Payloads that passed the full pipeline.
    pub verified_total: IntCounter,
    /// Policy rejections: blocked IP, unknown domain, stale timestamp.
    pub rejected_total: IntCounter,
    /// Integrity violations: nonce reuse, signature mismatch.
    pub tampered_total: IntCounter,
    /// Requests refused with 400 before reaching the pipeline.
    pub malformed_total: IntCounter,
    /// Requests refused for a missing or wrong bridge token.
    pub unauthenticated_total: IntCounter,
    /// Outgoing payloads signed.
    pub signed_total: IntCounter,
    /// Audit or incident writes that failed. Fed by the audit failure hook.
    pub audit_persist_failures_total: IntCounter,
    /// Current size of the IP block-list.
    pub blocked_ips: IntGauge,
    /// Time spent in the verification pipeline, in seconds.
    pub verification_latency_seconds: Histogram,
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nexus".into()), None)?;

        let verified_total = register(
            &registry,
            IntCounter::new("verified_total", "Payloads verified")?,
        )?;
        let rejected_total = register(
            &registry,
            IntCounter::new("rejected_total", "Payloads rejected by policy")?,
        )?;
        let tampered_total = register(
            &registry,
            IntCounter::new("tampered_total", "Payloads flagged as tampered or replayed")?,
        )?;
        let malformed_total = register(
            &registry,
            IntCounter::new("malformed_total", "Malformed bridge requests")?,
        )?;
        let unauthenticated_total = register(
            &registry,
            IntCounter::new(
                "unauthenticated_total",
                "Requests with a missing or wrong bridge token",
            )?,
        )?;
        let signed_total = register(
            &registry,
            IntCounter::new("signed_total", "Outgoing payloads signed")?,
        )?;
        let audit_persist_failures_total = register(
            &registry,
            IntCounter::new(
                "audit_persist_failures_total",
                "Audit trail or security incident writes that failed",
            )?,
        )?;
        let blocked_ips = register(
            &registry,
            IntGauge::new("blocked_ips", "Source IPs currently on the block-list")?,
        )?;
        let verification_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "verification_latency_seconds",
                    "Time spent in the verification pipeline in seconds",
                )
                .buckets(vec![
                    0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05,
                ]),
            )?,
        )?;

        Ok(Self {
            registry,
            verified_total,
            rejected_total,
            tampered_total,
            malformed_total,
            unauthenticated_total,
            signed_total,
            audit_persist_failures_total,
            blocked_ips,
            verification_latency_seconds,
        })
    }

    /// Bumps the counter matching a verdict.
    pub fn observe_verdict(&self, verdict: &VerificationResult) {
        match verdict.status {
            VerificationStatus::Verified => self.verified_total.inc(),
            VerificationStatus::Rejected => self.rejected_total.inc(),
            VerificationStatus::Tampered => self.tampered_total.inc(),
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
