//! # Bridge
//!
//! One side of the bridge, fully assembled. A [`Bridge`] owns its nonce
//! ledger, access guard and audit sink outright: there is no global state,
//! so a test can build as many isolated bridges as it likes and a process
//! could in principle front several partners at once.
//!
//! ```
//! use nexus_bridge::bridge::Bridge;
//! use nexus_bridge::config::BridgeConfig;
//! use nexus_bridge::message::{Direction, Payload, VerificationStatus};
//! use nexus_bridge::signer::SharedSecret;
//! use nexus_bridge::verifier::SourceInfo;
//! use serde_json::Map;
//!
//! let bridge = Bridge::new(BridgeConfig::default(), SharedSecret::from("s3cr3t")).unwrap();
//! let outgoing = bridge.sign_outgoing(Payload::now("NX-1", Direction::AtoB, Map::new()));
//!
//! let verdict = bridge.verify_incoming(&outgoing.signed_payload, &SourceInfo::default());
//! assert_eq!(verdict.status, VerificationStatus::Verified);
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::audit::AuditSink;
use crate::config::BridgeConfig;
use crate::crypto::constant_time_eq;
use crate::error::BridgeError;
use crate::guard::{AccessGuard, BlockedIpEntry};
use crate::ledger::NonceLedger;
use crate::message::{Payload, SignedPayload, VerificationResult};
use crate::signer::{BridgeHeaders, PayloadSigner, SharedSecret};
use crate::verifier::{PayloadVerifier, SourceInfo};
use crate::wire::{SignResponse, StatusReport};

/// The composition root: signer, verifier and the state they share.
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    secret: SharedSecret,
    signer: PayloadSigner,
    verifier: PayloadVerifier,
    ledger: Arc<NonceLedger>,
    guard: Arc<AccessGuard>,
    audit: Arc<AuditSink>,
}

impl Bridge {
    /// Builds a bridge with an in-memory audit sink.
    pub fn new(config: BridgeConfig, secret: SharedSecret) -> Result<Self, BridgeError> {
        let audit = AuditSink::in_memory(config.recent_window);
        Self::with_audit_sink(config, secret, audit)
    }

    /// Builds a bridge around a caller-configured audit sink (persistent
    /// stores, failure hook).
    pub fn with_audit_sink(
        config: BridgeConfig,
        secret: SharedSecret,
        audit: AuditSink,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        if secret.is_empty() {
            return Err(BridgeError::Config("shared secret must not be empty".into()));
        }

        let ledger = Arc::new(NonceLedger::from_config(&config));
        let guard = Arc::new(AccessGuard::new(&config.allowed_domains));
        let audit = Arc::new(audit);
        let verifier = PayloadVerifier::new(
            Arc::clone(&ledger),
            Arc::clone(&guard),
            Arc::clone(&audit),
            config.freshness_window(),
        );

        info!(
            freshness_window_secs = config.freshness_window_secs,
            allowed_domains = config.allowed_domains.len(),
            ledger = ?config.ledger,
            "bridge initialized"
        );

        Ok(Self {
            signer: PayloadSigner::new(secret.clone()),
            config,
            secret,
            verifier,
            ledger,
            guard,
            audit,
        })
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Signs `payload` and returns it with its transport headers.
    ///
    /// The token header carries the placeholder: the outgoing identity token
    /// belongs to the transport, not to the signer.
    pub fn sign_outgoing(&self, payload: Payload) -> SignResponse {
        let signed_payload = self.signer.sign(payload);
        let headers = BridgeHeaders::for_signed(&signed_payload, None);
        SignResponse {
            signed_payload,
            headers,
        }
    }

    /// Runs the verification pipeline.
    pub fn verify_incoming(&self, signed: &SignedPayload, source: &SourceInfo) -> VerificationResult {
        self.verifier.verify(signed, &self.secret, source)
    }

    /// Runs the verification pipeline against an explicit clock.
    pub fn verify_incoming_at(
        &self,
        signed: &SignedPayload,
        source: &SourceInfo,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        self.verifier.verify_at(signed, &self.secret, source, now)
    }

    /// Read-only snapshot. `limit` defaults to, and is capped by, the
    /// configured recent window.
    pub fn status(&self, limit: Option<usize>) -> StatusReport {
        let limit = limit
            .unwrap_or(self.config.recent_window)
            .min(self.config.recent_window);
        StatusReport {
            counts: self.audit.counts(),
            recent: self.audit.recent(limit),
            blocked: self.guard.list_blocked(),
            ledger_size: self.ledger.len(),
        }
    }

    /// Administrative clear of a blocked source.
    pub fn unblock(&self, ip: &IpAddr) -> Option<BlockedIpEntry> {
        self.guard.unblock(ip)
    }

    // -----------------------------------------------------------------------
    // Bridge token
    // -----------------------------------------------------------------------

    /// Checks the identity token of a request. Fails closed: a bridge
    /// without a configured token authenticates nobody.
    pub fn check_token(&self, presented: Option<&str>) -> Result<(), BridgeError> {
        match (self.config.bridge_token.as_deref(), presented) {
            (Some(expected), Some(token))
                if constant_time_eq(expected.as_bytes(), token.as_bytes()) =>
            {
                Ok(())
            }
            _ => Err(BridgeError::Unauthenticated),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    pub fn ledger(&self) -> &NonceLedger {
        &self.ledger
    }
}
