//! Request and response envelopes for the single action endpoint.
//!
//! Every request is a JSON object with an `action` discriminator:
//!
//! ```json
//! {"action": "verify_incoming", "payload": {"transactionId": "...", ...}}
//! {"action": "sign_outgoing",   "payload": {"direction": "AtoB", "data": {...}}}
//! {"action": "bridge_status",   "limit": 20}
//! {"action": "admin_unblock",   "ip": "203.0.113.9"}
//! ```
//!
//! Incoming payloads are deserialized loosely (every field optional) and
//! then validated by hand, so a missing field surfaces as a precise
//! [`BridgeError::MissingField`] instead of a serde message. Malformed
//! requests never reach the verification pipeline and leave no audit trace.

use std::net::IpAddr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::{StatusCounts, TrafficLogEntry};
use crate::codec::generate_transaction_id;
use crate::config::TRANSACTION_ID_PREFIX;
use crate::error::BridgeError;
use crate::guard::BlockedIpEntry;
use crate::message::{Direction, Payload, SignedPayload, Timestamp};
use crate::signer::BridgeHeaders;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BridgeRequest {
    VerifyIncoming {
        #[serde(default)]
        payload: IncomingPayload,
    },
    SignOutgoing {
        payload: OutgoingPayload,
    },
    BridgeStatus {
        #[serde(default)]
        limit: Option<usize>,
    },
    AdminUnblock {
        ip: String,
    },
}

impl BridgeRequest {
    /// Parses a request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(body).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// The action name, for logs and metrics labels.
    pub fn action(&self) -> &'static str {
        match self {
            BridgeRequest::VerifyIncoming { .. } => "verify_incoming",
            BridgeRequest::SignOutgoing { .. } => "sign_outgoing",
            BridgeRequest::BridgeStatus { .. } => "bridge_status",
            BridgeRequest::AdminUnblock { .. } => "admin_unblock",
        }
    }
}

/// A signed payload as received, before validation.
///
/// `signature`, `nonce` and `timestamp` may also travel as transport
/// headers; see [`IncomingPayload::with_header_fallback`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPayload {
    pub transaction_id: Option<String>,
    pub direction: Option<String>,
    pub timestamp: Option<String>,
    pub data: Option<Value>,
    pub signature: Option<String>,
    pub nonce: Option<String>,
}

fn present(field: Option<String>, name: &'static str) -> Result<String, BridgeError> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BridgeError::MissingField(name)),
    }
}

fn data_object(data: Option<Value>) -> Result<Map<String, Value>, BridgeError> {
    match data {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(BridgeError::InvalidField {
            field: "data",
            reason: "must be a JSON object".into(),
        }),
        None => Err(BridgeError::MissingField("data")),
    }
}

impl IncomingPayload {
    /// Fills `signature`, `nonce` and `timestamp` from headers where the
    /// body left them out. Body values win.
    pub fn with_header_fallback(
        mut self,
        signature: Option<String>,
        nonce: Option<String>,
        timestamp: Option<String>,
    ) -> Self {
        self.signature = self.signature.or(signature);
        self.nonce = self.nonce.or(nonce);
        self.timestamp = self.timestamp.or(timestamp);
        self
    }

    /// Validates shape and builds the [`SignedPayload`] to verify.
    pub fn into_signed(self) -> Result<SignedPayload, BridgeError> {
        let transaction_id = present(self.transaction_id, "transactionId")?;
        let direction: Direction = present(self.direction, "direction")?.parse()?;
        let timestamp = Timestamp::parse(&present(self.timestamp, "timestamp")?)?;
        let data = data_object(self.data)?;
        let signature = present(self.signature, "signature")?;
        let nonce = present(self.nonce, "nonce")?;

        let payload = Payload::with_timestamp(transaction_id, direction, timestamp, data);
        Ok(SignedPayload::from_parts(payload, signature, nonce))
    }
}

/// A payload to sign. Only `direction` and `data` are required.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPayload {
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub direction: Direction,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub data: Value,
}

impl OutgoingPayload {
    /// Builds the payload, generating a transaction id and stamping the
    /// current time where none was given.
    pub fn into_payload(self) -> Result<Payload, BridgeError> {
        let transaction_id = match self.transaction_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => generate_transaction_id(TRANSACTION_ID_PREFIX, self.direction),
        };
        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => Timestamp::parse(raw)?,
            None => Timestamp::from_instant(Utc::now()),
        };
        let data = data_object(Some(self.data))?;
        Ok(Payload::with_timestamp(transaction_id, self.direction, timestamp, data))
    }
}

/// Parses the `ip` of an `admin_unblock` request.
pub fn parse_ip(raw: &str) -> Result<IpAddr, BridgeError> {
    raw.trim().parse().map_err(|_| BridgeError::InvalidField {
        field: "ip",
        reason: format!("not an IP address: {:?}", raw),
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub signed_payload: SignedPayload,
    pub headers: BridgeHeaders,
}

/// Read-only snapshot returned by `bridge_status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Newest first.
    pub recent: Vec<TrafficLogEntry>,
    pub blocked: Vec<BlockedIpEntry>,
    pub ledger_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockResponse {
    pub ip: IpAddr,
    pub unblocked: bool,
}

/// Body of every non-2xx response. Carries the public reason only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
