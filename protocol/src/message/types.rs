//! Core message types.
//!
//! Field names serialize in camelCase because that is what the other side
//! of the bridge speaks. Locally minted timestamps are ISO-8601 UTC with
//! millisecond precision; received ones keep their wire spelling. Either
//! way the text that is signed is exactly the text that is sent.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::BridgeError;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which way a message travels across the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// System A to system B (e.g. arrival confirmations).
    #[serde(rename = "AtoB")]
    AtoB,
    /// System B to system A (e.g. status updates).
    #[serde(rename = "BtoA")]
    BtoA,
}

impl Direction {
    /// The wire name, as it appears in the canonical string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AtoB => "AtoB",
            Direction::BtoA => "BtoA",
        }
    }

    /// Two-letter code used inside transaction IDs.
    pub fn code(&self) -> &'static str {
        match self {
            Direction::AtoB => "AB",
            Direction::BtoA => "BA",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AtoB" => Ok(Direction::AtoB),
            "BtoA" => Ok(Direction::BtoA),
            other => Err(BridgeError::InvalidField {
                field: "direction",
                reason: format!("expected AtoB or BtoA, got {:?}", other),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Formats a timestamp the way the bridge signs and transmits it:
/// RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drops everything below the millisecond.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// A payload timestamp: the instant it denotes plus the exact text that
/// travels on the wire.
///
/// The text is what gets signed. Timestamps minted locally use the
/// millisecond `Z` form; timestamps received from a peer keep whatever
/// valid RFC 3339 spelling the peer chose (`+00:00`, whole seconds,
/// microseconds), so the canonical string is rebuilt from the received
/// bytes rather than from a re-rendering of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    text: String,
}

impl Timestamp {
    /// Stamps `instant`, truncated to milliseconds, in the bridge's own form.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        let instant = truncate_to_millis(instant);
        Self {
            text: format_timestamp(&instant),
            instant,
        }
    }

    /// Parses a received RFC 3339 timestamp, keeping its text verbatim.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let instant = DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| BridgeError::InvalidField {
                field: "timestamp",
                reason: e.to_string(),
            })?;
        Ok(Self {
            instant,
            text: raw.to_owned(),
        })
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// An unsigned bridge message.
///
/// Fields are private: a payload is immutable once created. `data` is an
/// opaque JSON object; the bridge never interprets it beyond canonicalizing
/// it for the signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    transaction_id: String,
    direction: Direction,
    timestamp: Timestamp,
    data: Map<String, Value>,
}

impl Payload {
    /// Creates a payload. The timestamp is truncated to milliseconds.
    pub fn new(
        transaction_id: impl Into<String>,
        direction: Direction,
        timestamp: DateTime<Utc>,
        data: Map<String, Value>,
    ) -> Self {
        Self::with_timestamp(transaction_id, direction, Timestamp::from_instant(timestamp), data)
    }

    /// Creates a payload around an already-spelled timestamp, typically one
    /// taken off the wire.
    pub fn with_timestamp(
        transaction_id: impl Into<String>,
        direction: Direction,
        timestamp: Timestamp,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            direction,
            timestamp,
            data,
        }
    }

    /// Creates a payload stamped with the current time.
    pub fn now(
        transaction_id: impl Into<String>,
        direction: Direction,
        data: Map<String, Value>,
    ) -> Self {
        Self::new(transaction_id, direction, Utc::now(), data)
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The instant the payload was stamped, for freshness checks.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp.instant()
    }

    /// The timestamp exactly as signed and sent.
    pub fn timestamp_str(&self) -> &str {
        self.timestamp.as_str()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// SignedPayload
// ---------------------------------------------------------------------------

/// A payload together with its nonce and hex HMAC-SHA256 signature.
///
/// Only [`PayloadSigner`](crate::signer::PayloadSigner) builds these from
/// scratch; the verifier receives them deserialized off the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedPayload {
    #[serde(flatten)]
    payload: Payload,
    signature: String,
    nonce: String,
}

impl SignedPayload {
    pub(crate) fn new(payload: Payload, signature: String, nonce: String) -> Self {
        Self {
            payload,
            signature,
            nonce,
        }
    }

    /// Reassembles a signed payload from received parts. No checks happen
    /// here: that is the verifier's job.
    pub fn from_parts(payload: Payload, signature: String, nonce: String) -> Self {
        Self::new(payload, signature, nonce)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn transaction_id(&self) -> &str {
        self.payload.transaction_id()
    }

    pub fn into_parts(self) -> (Payload, String, String) {
        (self.payload, self.signature, self.nonce)
    }
}

// ---------------------------------------------------------------------------
// Verification verdicts
// ---------------------------------------------------------------------------

/// Outcome class of a verification attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// Signature valid, nonce fresh, timestamp fresh, source allowed.
    Verified,
    /// Policy said no (blocked IP, unauthorized domain, stale timestamp).
    /// Not evidence of tampering; retry once the condition is fixed.
    Rejected,
    /// Integrity violation (nonce reuse, signature mismatch). Never retry.
    Tampered,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Tampered => "tampered",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the verifier returns for every payload that enters the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub transaction_id: String,
    /// SHA-256 of the canonical JSON of `data`, hex-encoded.
    pub payload_hash: String,
    /// Public reason for non-verified outcomes. Never contains secrets or
    /// canonical strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_data() -> Map<String, Value> {
        json!({"shipmentId": "SHP1"}).as_object().cloned().unwrap()
    }

    #[test]
    fn direction_wire_names() {
        assert_eq!(serde_json::to_string(&Direction::AtoB).unwrap(), "\"AtoB\"");
        assert_eq!(serde_json::to_string(&Direction::BtoA).unwrap(), "\"BtoA\"");
        assert_eq!("BtoA".parse::<Direction>().unwrap(), Direction::BtoA);
        assert!("A2B".parse::<Direction>().is_err());
    }

    #[test]
    fn timestamp_truncated_to_millis() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let p = Payload::new("NX-1", Direction::AtoB, ts, sample_data());
        assert_eq!(p.timestamp().timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(format_timestamp(&p.timestamp()), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn payload_serializes_camel_case() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let p = Payload::new("NX-1", Direction::AtoB, ts, sample_data());
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["transactionId"], "NX-1");
        assert_eq!(v["direction"], "AtoB");
        assert_eq!(v["timestamp"], "2023-11-14T22:13:20.000Z");
        assert_eq!(v["data"]["shipmentId"], "SHP1");
    }

    #[test]
    fn signed_payload_is_flat_on_the_wire() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let p = Payload::new("NX-1", Direction::BtoA, ts, sample_data());
        let sp = SignedPayload::new(p.clone(), "ab".into(), "cd".into());
        let v = serde_json::to_value(&sp).unwrap();
        assert_eq!(v["transactionId"], "NX-1");
        assert_eq!(v["signature"], "ab");
        assert_eq!(v["nonce"], "cd");

        let back: SignedPayload = serde_json::from_value(v).unwrap();
        assert_eq!(back.payload(), &p);
    }

    #[test]
    fn received_timestamps_keep_their_spelling() {
        let v = json!({
            "transactionId": "NX-2",
            "direction": "AtoB",
            "timestamp": "2023-11-15T00:13:20+02:00",
            "data": {}
        });
        let p: Payload = serde_json::from_value(v).unwrap();
        assert_eq!(format_timestamp(&p.timestamp()), "2023-11-14T22:13:20.000Z");
        assert_eq!(p.timestamp_str(), "2023-11-15T00:13:20+02:00");

        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["timestamp"], "2023-11-15T00:13:20+02:00");
    }

    #[test]
    fn timestamp_parse_rejects_non_rfc3339() {
        let err = Timestamp::parse("17 Oct 2026 10:25").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidField { field: "timestamp", .. }));
        let micros = Timestamp::parse("2026-10-17T10:25:00.123456Z").unwrap();
        assert_eq!(micros.as_str(), "2026-10-17T10:25:00.123456Z");
        assert_eq!(micros.instant().timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn status_serializes_lowercase() {
        let r = VerificationResult {
            status: VerificationStatus::Tampered,
            transaction_id: "NX-1".into(),
            payload_hash: "00".into(),
            error: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "tampered");
        assert!(v.get("error").is_none());
    }
}
