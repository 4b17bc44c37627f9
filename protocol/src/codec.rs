//! # Handshake Codec
//!
//! The two business messages the bridge was built to carry:
//!
//! - [`ArrivalConfirmed`] travels A→B when a shipment lands.
//! - [`StatusUpdate`] travels B→A once customs has ruled on it.
//!
//! The codec turns them into [`Payload`]s ready for signing and back. It
//! knows nothing about HMACs, nonces or ledgers; a decoded message is only
//! as trustworthy as the verdict the verifier gave its payload.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::TRANSACTION_ID_PREFIX;
use crate::crypto::sha256_hex;
use crate::error::BridgeError;
use crate::message::{canonical_json, Direction, Payload};

/// Builds `{prefix}-{AB|BA}-{unixMillis}-{6 hex chars}`.
///
/// Unique enough to correlate logs across both systems. It is *not* the
/// anti-replay token; that is the nonce.
pub fn generate_transaction_id(prefix: &str, direction: Direction) -> String {
    let suffix: [u8; 3] = rand::thread_rng().gen();
    format!(
        "{}-{}-{}-{}",
        prefix,
        direction.code(),
        Utc::now().timestamp_millis(),
        hex::encode(suffix)
    )
}

// ---------------------------------------------------------------------------
// Shared encode/decode
// ---------------------------------------------------------------------------

/// A business message with a fixed direction on the bridge.
pub trait HandshakeMessage: Serialize + DeserializeOwned {
    const DIRECTION: Direction;

    /// Wraps the message in a fresh payload: new transaction id, stamped now.
    fn to_payload(&self) -> Result<Payload, BridgeError> {
        let transaction_id = generate_transaction_id(TRANSACTION_ID_PREFIX, Self::DIRECTION);
        self.to_payload_with(transaction_id, Utc::now())
    }

    /// Wraps the message with a caller-chosen transaction id and timestamp.
    fn to_payload_with(
        &self,
        transaction_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Payload, BridgeError> {
        let data = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(BridgeError::Codec("message is not a JSON object".into())),
            Err(e) => return Err(BridgeError::Codec(e.to_string())),
        };
        Ok(Payload::new(transaction_id, Self::DIRECTION, timestamp, data))
    }

    /// Decodes the message from `payload`, checking direction and shape.
    fn from_payload(payload: &Payload) -> Result<Self, BridgeError> {
        if payload.direction() != Self::DIRECTION {
            return Err(BridgeError::Codec(format!(
                "expected direction {}, got {}",
                Self::DIRECTION,
                payload.direction()
            )));
        }
        Self::from_data(payload.data())
    }

    /// Decodes the message from a bare `data` object.
    fn from_data(data: &Map<String, Value>) -> Result<Self, BridgeError> {
        serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| BridgeError::Codec(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ArrivalConfirmed (A→B)
// ---------------------------------------------------------------------------

/// Document references attached to an arrival.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentDocuments {
    #[serde(default)]
    pub invoices: Vec<String>,
    #[serde(default)]
    pub bills_of_lading: Vec<String>,
    #[serde(default)]
    pub packing_lists: Vec<String>,
}

/// A shipment has physically arrived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalConfirmed {
    pub shipment_id: String,
    pub external_reference: String,
    pub documents: ShipmentDocuments,
    pub arrival_timestamp: DateTime<Utc>,
}

impl HandshakeMessage for ArrivalConfirmed {
    const DIRECTION: Direction = Direction::AtoB;
}

// ---------------------------------------------------------------------------
// StatusUpdate (B→A)
// ---------------------------------------------------------------------------

/// Customs channel outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalStatus {
    Cleared,
    RedChannel,
    GreenChannel,
    YellowChannel,
    Held,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub receipt_number: String,
    pub amount: f64,
    /// ISO 4217 code.
    pub currency: String,
    pub paid_at: DateTime<Utc>,
}

/// Customs has ruled on a shipment.
///
/// `integrity_hash` binds the business fields on their own, so a status can
/// be checked again after it has left the bridge (stored, forwarded, shown
/// to an auditor).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub shipment_id: String,
    pub external_reference: String,
    pub legal_status: LegalStatus,
    #[serde(default)]
    pub payment_receipts: Vec<PaymentReceipt>,
    pub integrity_hash: String,
}

/// The fields covered by [`StatusUpdate::integrity_hash`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusFields<'a> {
    shipment_id: &'a str,
    external_reference: &'a str,
    legal_status: LegalStatus,
    payment_receipts: &'a [PaymentReceipt],
}

impl StatusUpdate {
    /// Builds an update with its integrity hash already filled in.
    pub fn new(
        shipment_id: impl Into<String>,
        external_reference: impl Into<String>,
        legal_status: LegalStatus,
        payment_receipts: Vec<PaymentReceipt>,
    ) -> Result<Self, BridgeError> {
        let mut update = Self {
            shipment_id: shipment_id.into(),
            external_reference: external_reference.into(),
            legal_status,
            payment_receipts,
            integrity_hash: String::new(),
        };
        update.integrity_hash = update.compute_integrity_hash()?;
        Ok(update)
    }

    /// SHA-256 over the canonical JSON of every field but the hash itself.
    pub fn compute_integrity_hash(&self) -> Result<String, BridgeError> {
        let fields = StatusFields {
            shipment_id: &self.shipment_id,
            external_reference: &self.external_reference,
            legal_status: self.legal_status,
            payment_receipts: &self.payment_receipts,
        };
        let value = serde_json::to_value(fields).map_err(|e| BridgeError::Codec(e.to_string()))?;
        Ok(sha256_hex(canonical_json(&value).as_bytes()))
    }

    /// Whether `integrity_hash` still matches the fields.
    pub fn verify_integrity(&self) -> bool {
        self.compute_integrity_hash()
            .map(|h| h == self.integrity_hash)
            .unwrap_or(false)
    }
}

impl HandshakeMessage for StatusUpdate {
    const DIRECTION: Direction = Direction::BtoA;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn arrival() -> ArrivalConfirmed {
        ArrivalConfirmed {
            shipment_id: "SHP1".into(),
            external_reference: "EXT-77".into(),
            documents: ShipmentDocuments {
                invoices: vec!["INV-1".into()],
                bills_of_lading: vec!["BL-9".into()],
                packing_lists: vec![],
            },
            arrival_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn status() -> StatusUpdate {
        StatusUpdate::new(
            "SHP1",
            "EXT-77",
            LegalStatus::GreenChannel,
            vec![PaymentReceipt {
                receipt_number: "R-1".into(),
                amount: 1250.5,
                currency: "USD".into(),
                paid_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn transaction_id_shape() {
        let id = generate_transaction_id("NX", Direction::BtoA);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "NX");
        assert_eq!(parts[1], "BA");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 6);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn arrival_payload_uses_camel_case_and_a_to_b() {
        let payload = arrival().to_payload().unwrap();
        assert_eq!(payload.direction(), Direction::AtoB);
        assert!(payload.transaction_id().starts_with("NX-AB-"));
        assert_eq!(payload.data()["shipmentId"], "SHP1");
        assert_eq!(payload.data()["documents"]["billsOfLading"][0], "BL-9");
    }

    #[test]
    fn arrival_decodes_back() {
        let payload = arrival().to_payload().unwrap();
        assert_eq!(ArrivalConfirmed::from_payload(&payload).unwrap(), arrival());
    }

    #[test]
    fn wrong_direction_is_a_codec_error() {
        let payload = arrival().to_payload().unwrap();
        let err = StatusUpdate::from_payload(&payload).unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));
    }

    #[test]
    fn legal_status_wire_names() {
        let payload = status().to_payload_with("NX-BA-1", Utc::now()).unwrap();
        assert_eq!(payload.data()["legalStatus"], "green_channel");
        assert_eq!(
            serde_json::to_value(LegalStatus::RedChannel).unwrap(),
            "red_channel"
        );
    }

    #[test]
    fn integrity_hash_detects_field_changes() {
        let mut update = status();
        assert!(update.verify_integrity());
        update.legal_status = LegalStatus::Held;
        assert!(!update.verify_integrity());
    }

    #[test]
    fn integrity_hash_ignores_field_order_on_the_wire() {
        let update = status();
        let payload = update.to_payload().unwrap();
        let decoded = StatusUpdate::from_payload(&payload).unwrap();
        assert!(decoded.verify_integrity());
        assert_eq!(decoded.integrity_hash, update.integrity_hash);
    }

    #[test]
    fn missing_field_is_a_codec_error() {
        let mut data = Map::new();
        data.insert("shipmentId".into(), Value::String("SHP1".into()));
        assert!(ArrivalConfirmed::from_data(&data).is_err());
    }
}
