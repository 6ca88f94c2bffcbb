//! Homomorphic engine port.
//!
//! Abstracts the encryption library from the pipeline. The pipeline only
//! relies on the algebra below: ciphertext + ciphertext and
//! ciphertext × plaintext scalar. Ciphertext × ciphertext is deliberately
//! absent.

use crate::domain::CryptoError;

/// Trait for the homomorphic operations the pipeline consumes.
///
/// Implementations hold their key material read-only after construction and
/// must be safe to call from several worker threads at once.
pub trait HomomorphicEngine: Send + Sync {
    /// Opaque ciphertext. Moved between threads, never serialized by the
    /// pipeline.
    type Ciphertext: Send;

    /// Short engine identifier for logs.
    fn name(&self) -> &str;

    /// Encrypt a plaintext number.
    ///
    /// # Errors
    /// Returns `CryptoError::Encryption` or `CryptoError::ValueOutOfRange`.
    fn encrypt(&self, value: f64) -> Result<Self::Ciphertext, CryptoError>;

    /// Decrypt a ciphertext back to a number.
    ///
    /// # Errors
    /// Returns `CryptoError::Decryption` if decryption fails.
    fn decrypt(&self, ciphertext: &Self::Ciphertext) -> Result<f64, CryptoError>;

    /// Homomorphic addition.
    ///
    /// # Errors
    /// Returns `CryptoError::ScaleMismatch` or `CryptoError::Computation`.
    fn add(
        &self,
        left: &Self::Ciphertext,
        right: &Self::Ciphertext,
    ) -> Result<Self::Ciphertext, CryptoError>;

    /// Homomorphic multiplication by a plaintext scalar.
    ///
    /// # Errors
    /// Returns `CryptoError::ScaleBudgetExhausted` or `CryptoError::Computation`.
    fn scalar_mul(
        &self,
        ciphertext: &Self::Ciphertext,
        scalar: f64,
    ) -> Result<Self::Ciphertext, CryptoError>;
}
