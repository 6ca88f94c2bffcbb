//! TFHE adapter: Implementation of HomomorphicEngine using tfhe-rs.
//!
//! Values are encrypted as `FheInt64` in fixed point. Every ciphertext carries
//! a [`FixedPoint`] record in the clear:
//!
//! - `encrypt(x)` encodes `round(x * 2^value_bits)` at scale `value_bits`.
//! - `add` requires equal scales and keeps the scale.
//! - `scalar_mul(c, k)` quantizes `k` at `factor_bits` and adds `factor_bits`
//!   to the scale. A product past `max_scale_bits` is refused.
//! - `decrypt` divides by `2^scale`.
//!
//! The record also holds an upper bound on the encoded magnitude, derived
//! from `max_abs_value` rather than from the encrypted value. `add` sums the
//! bounds and `scalar_mul` multiplies them by the quantized factor; any
//! operation whose bound could leave the `i64` range fails with
//! `CryptoError::Overflow` instead of wrapping inside the ciphertext.
//!
//! # Thread Safety
//!
//! **IMPORTANT**: `tfhe::set_server_key()` writes to a *thread-local* (TLS) global.
//!
//! Each homomorphic operation installs the server key on the calling thread
//! and removes it again through an RAII guard, so executor worker threads
//! never inherit or leak key state. Key material is read-only after
//! construction; the engine is shared across threads behind an `Arc`.

use std::fmt;

use tfhe::prelude::*;
use tfhe::{
    generate_keys, set_server_key, unset_server_key, ClientKey as TfheClientKey, ConfigBuilder,
    FheInt64, ServerKey as TfheServerKey,
};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::domain::{fingerprint, CryptoError};
use crate::ports::HomomorphicEngine;

/// Largest encoded magnitude accepted by [`encode`].
const MAX_ENCODED: f64 = (1u64 << 62) as f64;

/// Largest magnitude bound a ciphertext may carry.
const PLAINTEXT_LIMIT: u128 = i64::MAX as u128;

/// Encode `value` with `bits` fractional bits.
///
/// # Errors
/// `ValueOutOfRange` for non-finite values or values whose encoding does not
/// fit the accepted range.
pub fn encode(value: f64, bits: u32) -> Result<i64, CryptoError> {
    if !value.is_finite() {
        return Err(CryptoError::ValueOutOfRange);
    }
    let scaled = (value * 2f64.powi(bits as i32)).round();
    if scaled.abs() >= MAX_ENCODED {
        return Err(CryptoError::ValueOutOfRange);
    }
    Ok(scaled as i64)
}

/// Decode a raw fixed-point integer at `scale` fractional bits.
#[must_use]
pub fn decode(raw: i64, scale: u32) -> f64 {
    raw as f64 / 2f64.powi(scale as i32)
}

fn within_limit(bound: u128) -> Result<u128, CryptoError> {
    if bound > PLAINTEXT_LIMIT {
        Err(CryptoError::Overflow { bound })
    } else {
        Ok(bound)
    }
}

/// Clear-text bookkeeping of one ciphertext: its scale and a bound on the
/// magnitude of the encoded integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    scale: u32,
    bound: u128,
}

impl FixedPoint {
    /// Encode an input value, returning the raw integer to encrypt.
    ///
    /// # Errors
    /// `ValueOutOfRange` if `|value|` exceeds `max_abs_value`.
    pub fn encode_input(value: f64, params: &EngineConfig) -> Result<(i64, Self), CryptoError> {
        if !value.is_finite() || value.abs() > params.max_abs_value {
            return Err(CryptoError::ValueOutOfRange);
        }
        let raw = encode(value, params.value_bits)?;
        let bound = (params.max_abs_value * 2f64.powi(params.value_bits as i32)).ceil() as u128;
        Ok((
            raw,
            Self {
                scale: params.value_bits,
                bound: within_limit(bound)?,
            },
        ))
    }

    /// Fractional bits of the encoded value.
    #[must_use]
    pub fn scale(&self) -> u32 {
        self.scale
    }

    #[must_use]
    pub fn bound(&self) -> u128 {
        self.bound
    }

    /// Record of the sum `self + other`.
    ///
    /// # Errors
    /// `ScaleMismatch` or `Overflow`.
    pub fn plus(self, other: Self) -> Result<Self, CryptoError> {
        if self.scale != other.scale {
            return Err(CryptoError::ScaleMismatch {
                left: self.scale,
                right: other.scale,
            });
        }
        Ok(Self {
            scale: self.scale,
            bound: within_limit(self.bound.saturating_add(other.bound))?,
        })
    }

    /// Quantize `scalar` and return it with the record of the product.
    ///
    /// # Errors
    /// `ScaleBudgetExhausted`, `ValueOutOfRange` for an unencodable scalar,
    /// or `Overflow`.
    pub fn times(self, scalar: f64, params: &EngineConfig) -> Result<(i64, Self), CryptoError> {
        let required = self.scale + params.factor_bits;
        if required > params.max_scale_bits {
            return Err(CryptoError::ScaleBudgetExhausted {
                required,
                limit: params.max_scale_bits,
            });
        }
        let factor = encode(scalar, params.factor_bits)?;
        let bound = self
            .bound
            .saturating_mul(u128::from(factor.unsigned_abs()));
        Ok((
            factor,
            Self {
                scale: required,
                bound: within_limit(bound)?,
            },
        ))
    }
}

/// Encrypted fixed-point value.
///
/// Deliberately neither `Debug` nor `Serialize`: ciphertexts never leave the
/// process and are never logged.
pub struct TfheCiphertext {
    inner: FheInt64,
    fixed: FixedPoint,
}

impl TfheCiphertext {
    /// Fractional bits of the encoded value.
    #[must_use]
    pub fn scale(&self) -> u32 {
        self.fixed.scale
    }
}

/// Installs the server key on the current thread for the guard's lifetime.
struct ServerKeyGuard;

impl ServerKeyGuard {
    fn install(key: &TfheServerKey) -> Self {
        set_server_key(key.clone());
        Self
    }
}

impl Drop for ServerKeyGuard {
    fn drop(&mut self) {
        unset_server_key();
    }
}

/// tfhe-rs backed engine holding one client/server key pair.
pub struct TfheEngine {
    client_key: TfheClientKey,
    server_key: TfheServerKey,
    params: EngineConfig,
    fingerprint: String,
}

impl TfheEngine {
    /// Generate a fresh key pair.
    ///
    /// Key generation is slow (seconds in release builds, much longer in
    /// debug builds).
    ///
    /// # Errors
    /// `KeyGeneration` if the parameters are inconsistent or the key cannot
    /// be fingerprinted.
    pub fn generate(params: EngineConfig) -> Result<Self, CryptoError> {
        params
            .validate()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        tracing::info!(
            value_bits = params.value_bits,
            factor_bits = params.factor_bits,
            max_scale_bits = params.max_scale_bits,
            "Generating FHE key pair..."
        );

        let config = ConfigBuilder::default().build();
        let (client_key, server_key) = generate_keys(config);

        let client_bytes = Zeroizing::new(bincode::serialize(&client_key).map_err(|e| {
            CryptoError::KeyGeneration(format!("Failed to serialize client key: {e}"))
        })?);
        let fingerprint = fingerprint(&client_bytes);

        tracing::info!(fingerprint = %fingerprint, "Generated tfhe-rs keys");

        Ok(Self {
            client_key,
            server_key,
            params,
            fingerprint,
        })
    }

    /// Short hex fingerprint of the client key.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for TfheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TfheEngine")
            .field("params", &self.params)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl HomomorphicEngine for TfheEngine {
    type Ciphertext = TfheCiphertext;

    fn name(&self) -> &str {
        "tfhe"
    }

    fn encrypt(&self, value: f64) -> Result<TfheCiphertext, CryptoError> {
        let (encoded, fixed) = FixedPoint::encode_input(value, &self.params)?;
        let inner = FheInt64::encrypt(encoded, &self.client_key);
        tracing::trace!("Encrypted one value");
        Ok(TfheCiphertext { inner, fixed })
    }

    fn decrypt(&self, ciphertext: &TfheCiphertext) -> Result<f64, CryptoError> {
        let raw: i64 = ciphertext.inner.decrypt(&self.client_key);
        let value = decode(raw, ciphertext.fixed.scale);
        if !value.is_finite() {
            return Err(CryptoError::Decryption(
                "Decryption produced a non-finite value".into(),
            ));
        }
        Ok(value)
    }

    fn add(&self, left: &TfheCiphertext, right: &TfheCiphertext) -> Result<TfheCiphertext, CryptoError> {
        let fixed = left.fixed.plus(right.fixed)?;
        let _guard = ServerKeyGuard::install(&self.server_key);
        Ok(TfheCiphertext {
            inner: &left.inner + &right.inner,
            fixed,
        })
    }

    fn scalar_mul(&self, ciphertext: &TfheCiphertext, scalar: f64) -> Result<TfheCiphertext, CryptoError> {
        let (factor, fixed) = ciphertext.fixed.times(scalar, &self.params)?;
        let _guard = ServerKeyGuard::install(&self.server_key);
        Ok(TfheCiphertext {
            inner: &ciphertext.inner * factor,
            fixed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_quantization() {
        assert_eq!(encode(0.5, 12).unwrap(), 2048);
        assert_eq!(encode(-0.5, 12).unwrap(), -2048);
        assert_eq!(encode(45.0, 12).unwrap(), 45 * 4096);
        // Rounds to nearest.
        assert_eq!(encode(1.0 / 3.0, 12).unwrap(), 1365);
    }

    #[test]
    fn test_encode_round_trip_within_resolution() {
        for &x in &[0.0, 1.0, -1.0, 3.141_592_65, -1234.5678, 98_765.4321] {
            let back = decode(encode(x, 12).unwrap(), 12);
            assert!((back - x).abs() <= 2f64.powi(-12), "{x} -> {back}");
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(encode(f64::NAN, 12), Err(CryptoError::ValueOutOfRange)));
        assert!(matches!(encode(f64::INFINITY, 12), Err(CryptoError::ValueOutOfRange)));
        assert!(matches!(encode(1e18, 12), Err(CryptoError::ValueOutOfRange)));
    }

    #[test]
    fn test_decode_product_scale() {
        // 45 at 12 bits times 0.5 at 24 bits lives at 36 bits.
        let raw = encode(45.0, 12).unwrap() * encode(0.5, 24).unwrap();
        assert!((decode(raw, 36) - 22.5).abs() < 1e-9);
    }

    #[test]
    fn test_input_bound_comes_from_config() {
        let params = EngineConfig::default();
        let (raw, small) = FixedPoint::encode_input(1.0, &params).unwrap();
        let (_, large) = FixedPoint::encode_input(-999_999.0, &params).unwrap();
        assert_eq!(raw, 4096);
        assert_eq!(small, large);
        assert_eq!(small.scale(), 12);
        assert!(matches!(
            FixedPoint::encode_input(2e6, &params),
            Err(CryptoError::ValueOutOfRange)
        ));
    }

    #[test]
    fn test_product_overflow_is_refused() {
        let wide = EngineConfig {
            max_abs_value: 1e9,
            ..EngineConfig::default()
        };
        let (_, fixed) = FixedPoint::encode_input(2e8, &wide).unwrap();
        assert!(matches!(
            fixed.times(1.0, &wide),
            Err(CryptoError::Overflow { .. })
        ));

        let params = EngineConfig::default();
        let (_, fixed) = FixedPoint::encode_input(2e5, &params).unwrap();
        let (factor, product) = fixed.times(1.0, &params).unwrap();
        assert_eq!(factor, 1 << 24);
        assert_eq!(product.scale(), 36);
        assert!(product.bound() <= i64::MAX as u128);
    }

    #[test]
    fn test_sum_overflow_is_refused() {
        let params = EngineConfig {
            max_abs_value: 1e15,
            ..EngineConfig::default()
        };
        let (_, x) = FixedPoint::encode_input(1e15, &params).unwrap();
        let two = x.plus(x).unwrap();
        assert!(matches!(two.plus(x), Err(CryptoError::Overflow { .. })));
    }

    #[test]
    fn test_long_average_fits_default_budget() {
        let params = EngineConfig::default();
        let (_, x) = FixedPoint::encode_input(0.0, &params).unwrap();
        let mut acc = x;
        for _ in 1..10_000 {
            acc = acc.plus(x).unwrap();
        }
        let (_, mean) = acc.times(1.0 / 10_000.0, &params).unwrap();
        assert_eq!(mean.scale(), 36);
    }

    #[test]
    fn test_scale_rules_without_keys() {
        let params = EngineConfig::default();
        let (_, x) = FixedPoint::encode_input(2.0, &params).unwrap();
        let (_, scaled) = x.times(1.5, &params).unwrap();
        assert!(matches!(
            x.plus(scaled),
            Err(CryptoError::ScaleMismatch { left: 12, right: 36 })
        ));
        assert!(matches!(
            scaled.times(2.0, &params),
            Err(CryptoError::ScaleBudgetExhausted { required: 60, limit: 40 })
        ));
    }

    #[test]
    fn test_invalid_params_refused_before_keygen() {
        let params = EngineConfig {
            value_bits: 30,
            factor_bits: 30,
            max_scale_bits: 40,
            ..EngineConfig::default()
        };
        assert!(matches!(
            TfheEngine::generate(params),
            Err(CryptoError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_generated_engine_computes_under_encryption() {
        let engine = TfheEngine::generate(EngineConfig::default()).expect("keygen");
        assert_eq!(engine.fingerprint().len(), 16);

        let a = engine.encrypt(30.0).expect("encrypt");
        let b = engine.encrypt(45.0).expect("encrypt");
        let c = engine.encrypt(60.0).expect("encrypt");
        let sum = engine.add(&engine.add(&a, &b).expect("add"), &c).expect("add");
        assert!((engine.decrypt(&sum).expect("decrypt") - 135.0).abs() < 1e-3);

        let avg = engine.scalar_mul(&sum, 1.0 / 3.0).expect("scalar_mul");
        assert_eq!(avg.scale(), 36);
        assert!((engine.decrypt(&avg).expect("decrypt") - 45.0).abs() < 1e-3 * 45.0);

        assert!(matches!(
            engine.add(&a, &avg),
            Err(CryptoError::ScaleMismatch { left: 12, right: 36 })
        ));
        assert!(matches!(engine.encrypt(2e8), Err(CryptoError::ValueOutOfRange)));
    }
}
