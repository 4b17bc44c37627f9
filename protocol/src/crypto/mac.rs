//! HMAC-SHA256 signing and verification, plus nonce generation.
//!
//! Signatures travel as lowercase hex. Verification decodes the received hex
//! and hands the raw bytes to `Mac::verify_slice` so the comparison is
//! constant-time; a signature that is not even valid hex simply fails.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::NONCE_BYTES;

type HmacSha256 = Hmac<Sha256>;

/// Computes `HMAC-SHA256(message, secret)` and returns it hex-encoded.
///
/// HMAC accepts keys of any length (short keys are padded, long keys are
/// hashed), so this cannot fail.
pub fn hmac_sha256_hex(message: &[u8], secret: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex-encoded HMAC-SHA256 signature in constant time.
///
/// Returns `false` for malformed hex or wrong-length signatures rather than
/// an error: to the verifier those are just signatures that don't match.
pub fn verify_hmac_hex(message: &[u8], secret: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time equality for secrets such as the bridge token.
///
/// Both sides are padded to the longer length with different fill bytes, so
/// a length mismatch costs the same as a content mismatch and still fails.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0x00u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a);
    b_padded[..b.len()].copy_from_slice(b);

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

/// Generates a fresh random nonce of [`NONCE_BYTES`] bytes, hex-encoded.
pub fn random_nonce_hex() -> String {
    let mut nonce = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);
    hex::encode(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokeN"));
        assert!(!constant_time_eq(b"token", b"token-longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_rejects_prefixes_and_padding_lookalikes() {
        // A shorter value must not match even if the padding would line up.
        assert!(!constant_time_eq(b"tok", b"tok\xFF\xFF"));
        assert!(!constant_time_eq(b"tok\x00\x00", b"tok"));
        assert!(!constant_time_eq(b"", b"token"));
    }

    #[test]
    fn hmac_rfc4231_case_2() {
        // RFC 4231 test case 2: key = "Jefe".
        let sig = hmac_sha256_hex(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_own_signature() {
        let sig = hmac_sha256_hex(b"payload", b"s3cr3t");
        assert!(verify_hmac_hex(b"payload", b"s3cr3t", &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let sig = hmac_sha256_hex(b"payload", b"s3cr3t");
        assert!(!verify_hmac_hex(b"payload", b"other", &sig));
    }

    #[test]
    fn verify_rejects_modified_message() {
        let sig = hmac_sha256_hex(b"payload", b"s3cr3t");
        assert!(!verify_hmac_hex(b"payloae", b"s3cr3t", &sig));
    }

    #[test]
    fn verify_rejects_garbage_hex() {
        assert!(!verify_hmac_hex(b"payload", b"s3cr3t", "not-hex"));
        assert!(!verify_hmac_hex(b"payload", b"s3cr3t", "abcd"));
        assert!(!verify_hmac_hex(b"payload", b"s3cr3t", ""));
    }

    #[test]
    fn verify_accepts_uppercase_hex() {
        let sig = hmac_sha256_hex(b"payload", b"s3cr3t").to_uppercase();
        assert!(verify_hmac_hex(b"payload", b"s3cr3t", &sig));
    }

    #[test]
    fn nonces_are_hex_and_unique() {
        let a = random_nonce_hex();
        let b = random_nonce_hex();
        assert_eq!(a.len(), NONCE_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
