//! Engine-level error type and key fingerprinting.

use sha2::{Digest, Sha256};

/// Error type for homomorphic engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Homomorphic computation failed: {0}")]
    Computation(String),

    #[error("Ciphertext scale mismatch: {left} vs {right} fractional bits")]
    ScaleMismatch { left: u32, right: u32 },

    #[error("Scale budget exhausted: {required} fractional bits exceeds limit of {limit}")]
    ScaleBudgetExhausted { required: u32, limit: u32 },

    #[error("Value out of encodable range")]
    ValueOutOfRange,

    #[error("Encoded magnitude bound {bound} would overflow the 64-bit plaintext space")]
    Overflow { bound: u128 },
}

/// Short identifier for key material.
///
/// SHA-256 of the serialized key, truncated to 64 bits and hex encoded.
/// The digest is safe to log; the key bytes are not.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_uses_hash() {
        let fp = fingerprint(&[0xde, 0xad, 0xbe, 0xef]);
        assert_ne!(fp, "deadbeef");
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(fingerprint(&[1, 2, 3, 4]), fingerprint(&[1, 2, 3, 4]));
        assert_ne!(fingerprint(&[1, 2, 3, 4]), fingerprint(&[1, 2, 3, 5]));
    }

    #[test]
    fn test_error_messages_carry_no_values() {
        let msg = CryptoError::ValueOutOfRange.to_string();
        assert_eq!(msg, "Value out of encodable range");
    }
}
