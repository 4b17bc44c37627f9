//! Incoming message verification.
//!
//! The pipeline runs cheapest and most defensive checks first, and stops at
//! the first failure:
//!
//! 1. **IP block**: a block-listed source is rejected before any work.
//! 2. **Domain**: a supplied source domain must be on the allow-list.
//! 3. **Freshness**: `|now - timestamp|` must fit the freshness window.
//! 4. **Nonce**: a consumed nonce means replay, so tampered, source blocked.
//! 5. **Signature**: recompute the HMAC over the *received* fields; a
//!    mismatch means tampered, source blocked.
//! 6. **Commit**: atomically consume the nonce. Losing that race to a
//!    concurrent verification of the same nonce is a replay too.
//!
//! Whatever the outcome, exactly one [`TrafficLogEntry`] goes to the audit
//! sink before the verdict is returned.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::audit::{AuditSink, SecurityIncident, TrafficLogEntry};
use crate::crypto::verify_hmac_hex;
use crate::guard::AccessGuard;
use crate::ledger::NonceLedger;
use crate::message::{
    canonical_string, payload_hash, SignedPayload, VerificationResult, VerificationStatus,
};
use crate::signer::SharedSecret;

// ---------------------------------------------------------------------------
// Transport metadata
// ---------------------------------------------------------------------------

/// What the transport knows about where a payload came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub ip: Option<IpAddr>,
    pub domain: Option<String>,
    /// Logical endpoint name, for the audit trail.
    pub endpoint: Option<String>,
    /// Size of the request body in bytes, for the audit trail.
    pub payload_size: Option<usize>,
}

impl SourceInfo {
    pub fn new(ip: Option<IpAddr>, domain: Option<String>) -> Self {
        Self {
            ip,
            domain,
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = Some(size);
        self
    }
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

/// Why a payload did not verify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    BlockedSource,
    UnauthorizedDomain,
    StaleTimestamp {
        /// Signed drift in seconds; negative means the payload is from the future.
        drift_secs: i64,
    },
    NonceReuse,
    SignatureMismatch,
}

impl Rejection {
    /// Policy rejections are `rejected`, integrity violations `tampered`.
    pub fn status(&self) -> VerificationStatus {
        match self {
            Rejection::BlockedSource
            | Rejection::UnauthorizedDomain
            | Rejection::StaleTimestamp { .. } => VerificationStatus::Rejected,
            Rejection::NonceReuse | Rejection::SignatureMismatch => VerificationStatus::Tampered,
        }
    }

    /// Reason recorded on the block-list entry, for integrity violations.
    pub fn block_reason(&self) -> Option<&'static str> {
        match self {
            Rejection::NonceReuse => Some("nonce reuse"),
            Rejection::SignatureMismatch => Some("signature mismatch"),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BlockedSource => f.write_str("source IP is blocked"),
            Rejection::UnauthorizedDomain => f.write_str("source domain is not authorized"),
            Rejection::StaleTimestamp { drift_secs } => write!(
                f,
                "timestamp outside freshness window (drift {}s)",
                drift_secs
            ),
            Rejection::NonceReuse => f.write_str("nonce reuse detected"),
            Rejection::SignatureMismatch => f.write_str("signature mismatch"),
        }
    }
}

// ---------------------------------------------------------------------------
// PayloadVerifier
// ---------------------------------------------------------------------------

/// Runs the verification pipeline against shared ledger, guard and audit sink.
#[derive(Debug, Clone)]
pub struct PayloadVerifier {
    ledger: Arc<NonceLedger>,
    guard: Arc<AccessGuard>,
    audit: Arc<AuditSink>,
    window: Duration,
}

impl PayloadVerifier {
    pub fn new(
        ledger: Arc<NonceLedger>,
        guard: Arc<AccessGuard>,
        audit: Arc<AuditSink>,
        window: Duration,
    ) -> Self {
        Self {
            ledger,
            guard,
            audit,
            window,
        }
    }

    /// Verifies `signed` against the current clock.
    pub fn verify(
        &self,
        signed: &SignedPayload,
        secret: &SharedSecret,
        source: &SourceInfo,
    ) -> VerificationResult {
        self.verify_at(signed, secret, source, Utc::now())
    }

    /// Verifies `signed` as if the current time were `now`.
    pub fn verify_at(
        &self,
        signed: &SignedPayload,
        secret: &SharedSecret,
        source: &SourceInfo,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let outcome = self.run_pipeline(signed, secret, source, now);
        self.conclude(signed, source, outcome)
    }

    fn run_pipeline(
        &self,
        signed: &SignedPayload,
        secret: &SharedSecret,
        source: &SourceInfo,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if let Some(ip) = &source.ip {
            if self.guard.is_blocked(ip) {
                return Err(Rejection::BlockedSource);
            }
        }

        if let Some(domain) = &source.domain {
            if !self.guard.is_domain_authorized(domain) {
                return Err(Rejection::UnauthorizedDomain);
            }
        }

        let drift = now - signed.payload().timestamp();
        if drift.abs() > self.window {
            return Err(Rejection::StaleTimestamp {
                drift_secs: drift.num_seconds(),
            });
        }

        if self.ledger.contains(signed.nonce(), now) {
            return Err(Rejection::NonceReuse);
        }

        let canonical = canonical_string(signed.payload(), signed.nonce());
        if !verify_hmac_hex(canonical.as_bytes(), secret.as_bytes(), signed.signature()) {
            return Err(Rejection::SignatureMismatch);
        }

        if !self.ledger.insert_if_absent(signed.nonce(), now) {
            return Err(Rejection::NonceReuse);
        }

        Ok(())
    }

    /// Applies side effects for the outcome and writes the audit entry.
    fn conclude(
        &self,
        signed: &SignedPayload,
        source: &SourceInfo,
        outcome: Result<(), Rejection>,
    ) -> VerificationResult {
        let payload = signed.payload();
        let hash = payload_hash(payload.data());
        let source_ip = source.ip.map(|ip| ip.to_string()).unwrap_or_default();

        let (status, error) = match &outcome {
            Ok(()) => {
                info!(
                    transaction_id = payload.transaction_id(),
                    direction = %payload.direction(),
                    source_ip,
                    "payload verified"
                );
                (VerificationStatus::Verified, None)
            }
            Err(rejection) => {
                let status = rejection.status();
                if let Some(reason) = rejection.block_reason() {
                    warn!(
                        transaction_id = payload.transaction_id(),
                        source_ip,
                        reason,
                        "integrity violation"
                    );
                    match source.ip {
                        Some(ip) => {
                            self.guard.block(ip, reason);
                        }
                        None => warn!(
                            transaction_id = payload.transaction_id(),
                            "integrity violation without source IP, nothing to block"
                        ),
                    }
                    self.audit.report_incident(SecurityIncident::new(
                        payload.transaction_id(),
                        source.ip,
                        reason,
                        hash.clone(),
                    ));
                } else {
                    warn!(
                        transaction_id = payload.transaction_id(),
                        source_ip,
                        reason = %rejection,
                        "payload rejected"
                    );
                }
                (status, Some(rejection.to_string()))
            }
        };

        self.audit.record(TrafficLogEntry {
            direction: payload.direction(),
            transaction_id: payload.transaction_id().to_owned(),
            payload_hash: hash.clone(),
            status,
            source_ip: source.ip,
            source_domain: source.domain.clone(),
            endpoint: source.endpoint.clone(),
            payload_size: source.payload_size,
            error: error.clone(),
            recorded_at: Utc::now(),
        });

        VerificationResult {
            status,
            transaction_id: payload.transaction_id().to_owned(),
            payload_hash: hash,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, Payload};
    use crate::signer::sign;
    use serde_json::{json, Map, Value};

    const ALLOWED: &str = "partner.example";

    fn verifier() -> (PayloadVerifier, Arc<AccessGuard>, Arc<AuditSink>) {
        let guard = Arc::new(AccessGuard::new([ALLOWED]));
        let audit = Arc::new(AuditSink::in_memory(16));
        let ledger = Arc::new(NonceLedger::time_bucketed(Duration::minutes(5)));
        let v = PayloadVerifier::new(ledger, guard.clone(), audit.clone(), Duration::minutes(5));
        (v, guard, audit)
    }

    fn data() -> Map<String, Value> {
        json!({"shipmentId": "SHP1"}).as_object().cloned().unwrap()
    }

    fn source() -> SourceInfo {
        SourceInfo::new(Some("203.0.113.9".parse().unwrap()), Some(ALLOWED.into()))
    }

    fn secret() -> SharedSecret {
        SharedSecret::from("s3cr3t")
    }

    #[test]
    fn valid_payload_verifies() {
        let (v, _, audit) = verifier();
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let r = v.verify(&signed, &secret(), &source());
        assert_eq!(r.status, VerificationStatus::Verified);
        assert_eq!(r.payload_hash, payload_hash(&data()));
        assert!(r.error.is_none());
        assert_eq!(audit.counts().verified, 1);
    }

    #[test]
    fn wrong_secret_is_tampered_and_blocks() {
        let (v, guard, _) = verifier();
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let r = v.verify(&signed, &SharedSecret::from("other"), &source());
        assert_eq!(r.status, VerificationStatus::Tampered);
        assert_eq!(r.error.as_deref(), Some("signature mismatch"));
        let entry = guard.blocked_entry(&"203.0.113.9".parse().unwrap()).unwrap();
        assert_eq!(entry.reason, "signature mismatch");
    }

    #[test]
    fn failed_signature_does_not_consume_nonce() {
        let (v, _, _) = verifier();
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let no_ip = SourceInfo::new(None, None);
        let r = v.verify(&signed, &SharedSecret::from("other"), &no_ip);
        assert_eq!(r.status, VerificationStatus::Tampered);

        // The genuine message still goes through afterwards.
        let r = v.verify(&signed, &secret(), &no_ip);
        assert_eq!(r.status, VerificationStatus::Verified);
    }

    #[test]
    fn future_drift_is_rejected_too() {
        let (v, _, _) = verifier();
        let ts = Utc::now() + Duration::minutes(6);
        let signed = sign(Payload::new("NX-1", Direction::AtoB, ts, data()), &secret());
        let r = v.verify(&signed, &secret(), &source());
        assert_eq!(r.status, VerificationStatus::Rejected);
        assert!(r.error.unwrap().starts_with("timestamp outside freshness window"));
    }

    #[test]
    fn edge_of_window_still_verifies() {
        let (v, _, _) = verifier();
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let at = signed.payload().timestamp() + Duration::minutes(5);
        let r = v.verify_at(&signed, &secret(), &source(), at);
        assert_eq!(r.status, VerificationStatus::Verified);
    }

    #[test]
    fn blocked_source_short_circuits_before_domain() {
        let (v, guard, audit) = verifier();
        guard.block("203.0.113.9".parse().unwrap(), "nonce reuse");
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let src = SourceInfo::new(Some("203.0.113.9".parse().unwrap()), Some("evil.example".into()));
        let r = v.verify(&signed, &secret(), &src);
        assert_eq!(r.error.as_deref(), Some("source IP is blocked"));
        assert_eq!(audit.counts().rejected, 1);
    }

    #[test]
    fn missing_domain_skips_domain_check() {
        let (v, _, _) = verifier();
        let signed = sign(Payload::now("NX-1", Direction::AtoB, data()), &secret());
        let src = SourceInfo::new(Some("203.0.113.9".parse().unwrap()), None);
        assert!(v.verify(&signed, &secret(), &src).is_verified());
    }

    #[test]
    fn audit_entry_carries_transport_metadata() {
        let (v, _, audit) = verifier();
        let signed = sign(Payload::now("NX-9", Direction::BtoA, data()), &secret());
        let src = source().with_endpoint("verify_incoming").with_payload_size(321);
        v.verify(&signed, &secret(), &src);

        let entry = &audit.recent(1)[0];
        assert_eq!(entry.transaction_id, "NX-9");
        assert_eq!(entry.direction, Direction::BtoA);
        assert_eq!(entry.endpoint.as_deref(), Some("verify_incoming"));
        assert_eq!(entry.payload_size, Some(321));
        assert_eq!(entry.source_domain.as_deref(), Some(ALLOWED));
    }

    #[test]
    fn rejection_classes() {
        assert_eq!(Rejection::BlockedSource.status(), VerificationStatus::Rejected);
        assert_eq!(
            Rejection::StaleTimestamp { drift_secs: 400 }.status(),
            VerificationStatus::Rejected
        );
        assert_eq!(Rejection::NonceReuse.status(), VerificationStatus::Tampered);
        assert!(Rejection::UnauthorizedDomain.block_reason().is_none());
    }
}
