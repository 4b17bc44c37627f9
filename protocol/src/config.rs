//! # Bridge Configuration & Constants
//!
//! Every magic number of the bridge lives here. If you're hardcoding a
//! freshness window or a header name somewhere else, you're doing it wrong.
//!
//! Two kinds of things live in this module:
//!
//! - **Protocol constants**: values both sides of the bridge must agree on
//!   (header names, nonce length, the freshness window). Changing them is a
//!   coordinated deploy on both systems, not a config tweak.
//! - **[`BridgeConfig`]**: deploy-time knobs for one side of the bridge
//!   (allowed domains, ledger sizing, how much recent traffic to keep in
//!   memory). Loadable from JSON, every field has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

// ---------------------------------------------------------------------------
// Anti-Replay Parameters
// ---------------------------------------------------------------------------

/// Maximum allowed drift between a payload timestamp and the verifier's
/// clock, in either direction. Anything outside is stale (or from the future)
/// and gets rejected before any crypto work.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(300);

/// Same as [`FRESHNESS_WINDOW`], in seconds, for serde defaults and chrono math.
pub const FRESHNESS_WINDOW_SECS: u64 = 300;

/// Nonce length in bytes. 16 bytes = 128 bits of entropy, hex-encoded to 32
/// characters on the wire.
pub const NONCE_BYTES: usize = 16;

/// Entry count at which a capacity-reset ledger swaps to a fresh set.
pub const DEFAULT_NONCE_LEDGER_CAPACITY: usize = 100_000;

/// Number of freshness-window-sized buckets a time-bucketed ledger retains.
///
/// A nonce accepted at `t` belongs to a payload stamped no earlier than
/// `t - W`, so a replay of it can only pass the freshness check until
/// `t + 2W`. Three buckets of width `W` always cover at least `2W` of history.
pub const LEDGER_BUCKETS: usize = 3;

// ---------------------------------------------------------------------------
// Wire Parameters
// ---------------------------------------------------------------------------

/// Out-of-band bridge identity token. Never part of the HMAC input.
pub const HEADER_BRIDGE_TOKEN: &str = "x-bridge-token";

/// Hex-encoded HMAC-SHA256 signature.
pub const HEADER_SIGNATURE: &str = "x-bridge-signature";

/// Hex-encoded nonce.
pub const HEADER_NONCE: &str = "x-bridge-nonce";

/// ISO-8601 timestamp of the signed payload.
pub const HEADER_TIMESTAMP: &str = "x-bridge-timestamp";

/// Placeholder emitted in outgoing headers when no bridge token is configured.
/// The transport layer is expected to substitute the real token.
pub const BRIDGE_TOKEN_PLACEHOLDER: &str = "<bridge-token>";

/// Separator between canonical string fields.
pub const CANONICAL_SEPARATOR: char = '|';

/// Default prefix for generated transaction IDs.
pub const TRANSACTION_ID_PREFIX: &str = "NX";

// ---------------------------------------------------------------------------
// Audit Parameters
// ---------------------------------------------------------------------------

/// How many recent traffic entries `bridge_status` returns by default.
pub const DEFAULT_RECENT_WINDOW: usize = 50;

/// Records that may wait for the audit writer before new ones are dropped.
pub const AUDIT_QUEUE_CAPACITY: usize = 4096;

/// Consecutive persistence failures after which the audit sink escalates
/// from `warn!` to `error!`.
pub const AUDIT_FAILURE_ESCALATION: u64 = 3;

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

/// How the nonce ledger bounds its memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LedgerStrategy {
    #[default]
    /// Buckets of one freshness window each; buckets older than
    /// [`LEDGER_BUCKETS`] windows are dropped whole.
    TimeBucketed,
    /// Single set, swapped for an empty one once it reaches `max_entries`.
    CapacityReset {
        /// Entry count that triggers the swap.
        #[serde(default = "default_ledger_capacity")]
        max_entries: usize,
    },
}

fn default_ledger_capacity() -> usize {
    DEFAULT_NONCE_LEDGER_CAPACITY
}

/// Deploy-time settings for one side of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Freshness window in seconds. Symmetric: past and future drift alike.
    pub freshness_window_secs: u64,
    /// Domains allowed to originate traffic (exact or dot-suffix match).
    pub allowed_domains: Vec<String>,
    /// Nonce ledger memory strategy.
    pub ledger: LedgerStrategy,
    /// Recent traffic entries kept in memory for status reporting.
    pub recent_window: usize,
    /// Pre-shared bridge identity token. Required to serve requests: with
    /// `None` every token check fails. Never part of the HMAC input.
    pub bridge_token: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: FRESHNESS_WINDOW_SECS,
            allowed_domains: Vec::new(),
            ledger: LedgerStrategy::default(),
            recent_window: DEFAULT_RECENT_WINDOW,
            bridge_token: None,
        }
    }
}

impl BridgeConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: BridgeConfig = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// The freshness window as a chrono duration.
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_window_secs as i64)
    }

    /// Rejects configurations that would break the anti-replay guarantee.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.freshness_window_secs == 0 {
            return Err(BridgeError::Config(
                "freshness_window_secs must be > 0".into(),
            ));
        }
        if let LedgerStrategy::CapacityReset { max_entries } = self.ledger {
            if max_entries == 0 {
                return Err(BridgeError::Config(
                    "ledger max_entries must be > 0".into(),
                ));
            }
        }
        if self.allowed_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(BridgeError::Config(
                "allowed_domains must not contain empty entries".into(),
            ));
        }
        if self.bridge_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(BridgeError::Config("bridge_token must not be blank".into()));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), plus the bridge token every served
    /// exchange requires.
    pub fn validate_for_serving(&self) -> Result<(), BridgeError> {
        self.validate()?;
        if self.bridge_token.is_none() {
            return Err(BridgeError::Config(
                "bridge_token is required to serve requests".into(),
            ));
        }
        Ok(())
    }
}
