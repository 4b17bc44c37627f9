//! # Cryptographic Primitives for the Bridge
//!
//! Everything security-related in the bridge flows through here, and there
//! is deliberately very little of it:
//!
//! - **HMAC-SHA256** for message integrity: keyed with the shared secret.
//! - **SHA-256** for payload fingerprints in the audit trail.
//! - **OsRng** for nonces: 128 bits, straight from the operating system.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around the
//! RustCrypto implementations. Signature comparison goes through
//! `Mac::verify_slice` and token comparison goes through `subtle`, both
//! constant-time. Do not replace either with `==`.

pub mod hash;
pub mod mac;

pub use hash::{sha256, sha256_hex};
pub use mac::{constant_time_eq, hmac_sha256_hex, random_nonce_hex, verify_hmac_hex};
