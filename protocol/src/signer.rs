//! Outgoing message signing.
//!
//! Signing is pure apart from the nonce: it canonicalizes the payload,
//! draws 128 random bits, and computes `HMAC-SHA256(canonical, secret)`.
//! Nothing is recorded anywhere. The nonce only enters a ledger when the
//! *receiving* side verifies the message.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{
    BRIDGE_TOKEN_PLACEHOLDER, HEADER_BRIDGE_TOKEN, HEADER_NONCE, HEADER_SIGNATURE,
    HEADER_TIMESTAMP,
};
use crate::crypto::{hmac_sha256_hex, random_nonce_hex};
use crate::message::{canonical_string, Payload, SignedPayload};

// ---------------------------------------------------------------------------
// SharedSecret
// ---------------------------------------------------------------------------

/// The HMAC key shared by both sides of the bridge, provisioned out of band.
///
/// `Debug` is redacted so the secret cannot leak through a stray `{:?}`.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Arc<[u8]>);

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self(Arc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SharedSecret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes redacted>)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Computes the hex signature of `payload` under `nonce`.
pub fn compute_signature(payload: &Payload, nonce: &str, secret: &SharedSecret) -> String {
    let canonical = canonical_string(payload, nonce);
    hmac_sha256_hex(canonical.as_bytes(), secret.as_bytes())
}

/// Signs `payload` with a fresh random nonce.
///
/// # Example
///
/// ```
/// use nexus_bridge::message::{Direction, Payload};
/// use nexus_bridge::signer::{sign, SharedSecret};
/// use serde_json::Map;
///
/// let payload = Payload::now("NX-1", Direction::AtoB, Map::new());
/// let signed = sign(payload, &SharedSecret::from("s3cr3t"));
/// assert_eq!(signed.signature().len(), 64);
/// ```
pub fn sign(payload: Payload, secret: &SharedSecret) -> SignedPayload {
    sign_with_nonce(payload, random_nonce_hex(), secret)
}

/// Signs `payload` with a caller-supplied nonce.
///
/// Deterministic. Only for fixtures and interop vectors: a reused nonce is
/// indistinguishable from a replay on the receiving side.
pub fn sign_with_nonce(payload: Payload, nonce: String, secret: &SharedSecret) -> SignedPayload {
    let signature = compute_signature(&payload, &nonce, secret);
    SignedPayload::new(payload, signature, nonce)
}

/// Holds the shared secret for the sending side of a bridge.
#[derive(Clone, Debug)]
pub struct PayloadSigner {
    secret: SharedSecret,
}

impl PayloadSigner {
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    pub fn sign(&self, payload: Payload) -> SignedPayload {
        sign(payload, &self.secret)
    }
}

// ---------------------------------------------------------------------------
// Transport headers
// ---------------------------------------------------------------------------

/// Headers the transport attaches to a signed exchange.
///
/// The bridge token identifies the calling system and is checked before the
/// pipeline; it is never part of the HMAC input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeHeaders {
    #[serde(rename = "x-bridge-token")]
    pub token: String,
    #[serde(rename = "x-bridge-signature")]
    pub signature: String,
    #[serde(rename = "x-bridge-nonce")]
    pub nonce: String,
    #[serde(rename = "x-bridge-timestamp")]
    pub timestamp: String,
}

impl BridgeHeaders {
    /// Headers for `signed`. `token = None` emits the placeholder.
    pub fn for_signed(signed: &SignedPayload, token: Option<&str>) -> Self {
        Self {
            token: token.unwrap_or(BRIDGE_TOKEN_PLACEHOLDER).to_owned(),
            signature: signed.signature().to_owned(),
            nonce: signed.nonce().to_owned(),
            timestamp: signed.payload().timestamp_str().to_owned(),
        }
    }

    /// `(name, value)` pairs, ready for a request builder.
    pub fn to_pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_BRIDGE_TOKEN, self.token.as_str()),
            (HEADER_SIGNATURE, self.signature.as_str()),
            (HEADER_NONCE, self.nonce.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
        ]
    }
}
