//! Bridge messages: what gets signed, what travels, what comes back.
//!
//! - [`Payload`]: an unsigned business message. Built by the caller (or
//!   the [`codec`](crate::codec)), immutable once created.
//! - [`SignedPayload`]: a payload plus its nonce and HMAC signature.
//! - [`VerificationResult`]: the verdict the verifier hands back.
//!
//! The [`canonical`] submodule defines the exact byte string fed to the
//! HMAC. Both sides of the bridge must produce it identically, so it is the
//! one piece of this crate that can never change without a coordinated
//! deploy.

pub mod canonical;
pub mod types;

pub use canonical::{canonical_json, canonical_string, payload_hash};
pub use types::{
    format_timestamp, Direction, Payload, SignedPayload, Timestamp, VerificationResult,
    VerificationStatus,
};
