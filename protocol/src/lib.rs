// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Nexus Bridge: Core Library
//!
//! Two independently operated systems, one untrusted wire between them, and
//! a shared secret. This crate is everything that makes a message crossing
//! that wire trustworthy: deterministic canonicalization, HMAC-SHA256
//! signatures, anti-replay through nonces plus a freshness window, domain
//! and IP access control, and an append-only audit trail that records every
//! verdict.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **ledger**: Consumed nonces. Seen it before? That's a replay.
//! - **guard**: Domain allow-list and the IP block-list tampering lands you on.
//! - **signer**: Canonicalize, draw a nonce, HMAC. Pure apart from the dice.
//! - **verifier**: The pipeline: block-list, domain, freshness, nonce, signature.
//! - **audit**: One log entry per verification attempt, whatever happens.
//! - **codec**: The two business messages the bridge actually carries.
//! - **bridge**: Wires the above into one explicitly constructed component.
//!
//! Supporting modules: **message** (payload types and canonical form),
//! **crypto** (hash, MAC, nonce), **wire** (action endpoint envelopes),
//! **config** (constants and deploy-time settings), **error**.
//!
//! ## Design Philosophy
//!
//! 1. A verdict is data, not an error. `rejected` and `tampered` are answers.
//! 2. The audit trail never changes a verdict. Storage is best effort.
//! 3. Nothing gets forgotten before the freshness window makes it harmless.
//! 4. No secret, canonical string or MAC intermediate ever leaves the crate
//!    in an error message or a log line.

pub mod audit;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod message;
pub mod signer;
pub mod verifier;
pub mod wire;

/// Library version, as reported by `nexus-node version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use bridge::Bridge;
pub use error::{AuditError, BridgeError};
pub use message::{Direction, Payload, SignedPayload, VerificationResult, VerificationStatus};
pub use signer::SharedSecret;
pub use verifier::SourceInfo;
