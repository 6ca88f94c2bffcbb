//! Test-only engine and fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::adapters::tfhe::{decode, FixedPoint};
use crate::config::EngineConfig;
use crate::domain::{Column, CryptoError, Table};
use crate::ports::HomomorphicEngine;

/// Ciphertext stand-in: the value plus the number of scalar products applied.
pub(crate) struct Sealed {
    value: f64,
    depth: u32,
}

/// Engine that counts calls and can fail on a chosen plaintext.
///
/// It performs no encryption; it exists to observe how the pipeline drives
/// the port.
#[derive(Default)]
pub(crate) struct RecordingEngine {
    encrypts: AtomicUsize,
    decrypts: AtomicUsize,
    adds: AtomicUsize,
    scalar_muls: AtomicUsize,
    fail_on: Option<f64>,
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail `encrypt` whenever it sees `value`.
    pub(crate) fn failing_on(value: f64) -> Self {
        Self {
            fail_on: Some(value),
            ..Self::default()
        }
    }

    pub(crate) fn encrypt_calls(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
    }

    pub(crate) fn decrypt_calls(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
    }

    pub(crate) fn add_calls(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub(crate) fn scalar_mul_calls(&self) -> usize {
        self.scalar_muls.load(Ordering::SeqCst)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.encrypt_calls() + self.decrypt_calls() + self.add_calls() + self.scalar_mul_calls()
    }
}

impl HomomorphicEngine for RecordingEngine {
    type Ciphertext = Sealed;

    fn name(&self) -> &str {
        "recording"
    }

    fn encrypt(&self, value: f64) -> Result<Sealed, CryptoError> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(value) {
            return Err(CryptoError::Encryption("injected failure".into()));
        }
        Ok(Sealed { value, depth: 0 })
    }

    fn decrypt(&self, ciphertext: &Sealed) -> Result<f64, CryptoError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        Ok(ciphertext.value)
    }

    fn add(&self, left: &Sealed, right: &Sealed) -> Result<Sealed, CryptoError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        if left.depth != right.depth {
            return Err(CryptoError::ScaleMismatch {
                left: left.depth,
                right: right.depth,
            });
        }
        Ok(Sealed {
            value: left.value + right.value,
            depth: left.depth,
        })
    }

    fn scalar_mul(&self, ciphertext: &Sealed, scalar: f64) -> Result<Sealed, CryptoError> {
        self.scalar_muls.fetch_add(1, Ordering::SeqCst);
        Ok(Sealed {
            value: ciphertext.value * scalar,
            depth: ciphertext.depth + 1,
        })
    }
}

/// Encoded integer with its fixed-point record.
pub(crate) struct Encoded {
    raw: i64,
    fixed: FixedPoint,
}

/// Engine with the tfhe adapter's fixed-point arithmetic on clear `i64`s.
///
/// Encoding, scale and bound rules are the adapter's own; the integer
/// arithmetic wraps exactly like `FheInt64` does.
pub(crate) struct FixedPointEngine {
    params: EngineConfig,
}

impl FixedPointEngine {
    pub(crate) fn new(params: EngineConfig) -> Self {
        Self { params }
    }
}

impl HomomorphicEngine for FixedPointEngine {
    type Ciphertext = Encoded;

    fn name(&self) -> &str {
        "fixed-point"
    }

    fn encrypt(&self, value: f64) -> Result<Encoded, CryptoError> {
        let (raw, fixed) = FixedPoint::encode_input(value, &self.params)?;
        Ok(Encoded { raw, fixed })
    }

    fn decrypt(&self, ciphertext: &Encoded) -> Result<f64, CryptoError> {
        Ok(decode(ciphertext.raw, ciphertext.fixed.scale()))
    }

    fn add(&self, left: &Encoded, right: &Encoded) -> Result<Encoded, CryptoError> {
        Ok(Encoded {
            raw: left.raw.wrapping_add(right.raw),
            fixed: left.fixed.plus(right.fixed)?,
        })
    }

    fn scalar_mul(&self, ciphertext: &Encoded, scalar: f64) -> Result<Encoded, CryptoError> {
        let (factor, fixed) = ciphertext.fixed.times(scalar, &self.params)?;
        Ok(Encoded {
            raw: ciphertext.raw.wrapping_mul(factor),
            fixed,
        })
    }
}

/// Build an all-numeric table from `(name, values)` pairs.
pub(crate) fn numeric_table(columns: &[(&str, &[f64])]) -> Table {
    Table::new(
        columns
            .iter()
            .map(|(name, values)| Column::numeric(*name, values))
            .collect(),
    )
    .expect("fixture table is valid")
}

pub(crate) fn names(n: &[&str]) -> Vec<String> {
    n.iter().map(|s| (*s).to_string()).collect()
}
