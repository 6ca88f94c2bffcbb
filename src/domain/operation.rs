//! Requested column operations and their output shape.

use std::fmt;
use std::str::FromStr;

use crate::CipherpathError;

/// Factor applied by `multiplication` when the request does not name one.
pub const DEFAULT_SCALE_FACTOR: f64 = 2.0;

/// Operation applied to every numeric column of both paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Column total, one row.
    Sum,
    /// Column mean, one row.
    Average,
    /// Column mean repeated on every input row.
    AverageBroadcast,
    /// Element-wise product with a plaintext factor.
    ScaledMultiply(f64),
}

/// Row shape produced by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// Whole column collapses to a single row.
    Reduced,
    /// One output row per input row.
    PerRow,
}

impl Operation {
    /// Resolve a wire operation name.
    ///
    /// `factor` only applies to `multiplication`; it defaults to
    /// [`DEFAULT_SCALE_FACTOR`].
    ///
    /// # Errors
    /// `UnsupportedOperation` for unknown names, `InvalidInput` for a
    /// non-finite factor.
    pub fn from_wire(name: &str, factor: Option<f64>) -> Result<Self, CipherpathError> {
        let op = match name.trim() {
            "addition" | "sum" => Self::Sum,
            "average" | "mean" => Self::Average,
            "average_broadcast" => Self::AverageBroadcast,
            "multiplication" | "scaled_multiply" => {
                Self::ScaledMultiply(factor.unwrap_or(DEFAULT_SCALE_FACTOR))
            }
            other => return Err(CipherpathError::UnsupportedOperation(other.to_string())),
        };
        op.validate()?;
        Ok(op)
    }

    /// Canonical wire name.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Sum => "addition",
            Self::Average => "average",
            Self::AverageBroadcast => "average_broadcast",
            Self::ScaledMultiply(_) => "multiplication",
        }
    }

    /// Factor carried on the wire, if any.
    #[must_use]
    pub fn factor(&self) -> Option<f64> {
        match self {
            Self::ScaledMultiply(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn shape(&self) -> OutputShape {
        match self {
            Self::Sum | Self::Average => OutputShape::Reduced,
            Self::AverageBroadcast | Self::ScaledMultiply(_) => OutputShape::PerRow,
        }
    }

    /// Whether the numeric work is a column reduction (sum of all values).
    #[must_use]
    pub fn is_reduction(&self) -> bool {
        !matches!(self, Self::ScaledMultiply(_))
    }

    /// Rows in the output for an input of `input_rows` rows.
    #[must_use]
    pub fn output_rows(&self, input_rows: usize) -> usize {
        match self.shape() {
            OutputShape::Reduced => 1,
            OutputShape::PerRow => input_rows,
        }
    }

    /// # Errors
    /// `InvalidInput` if the scale factor is NaN or infinite.
    pub fn validate(&self) -> Result<(), CipherpathError> {
        if let Self::ScaledMultiply(f) = self {
            if !f.is_finite() {
                return Err(CipherpathError::InvalidInput(format!(
                    "scale factor must be finite, got {f}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScaledMultiply(factor) => write!(f, "multiplication(x{factor})"),
            other => f.write_str(other.wire_name()),
        }
    }
}

impl FromStr for Operation {
    type Err = CipherpathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(Operation::from_wire("addition", None).unwrap(), Operation::Sum);
        assert_eq!(Operation::from_wire("average", None).unwrap(), Operation::Average);
        assert_eq!(
            Operation::from_wire("multiplication", None).unwrap(),
            Operation::ScaledMultiply(2.0)
        );
        assert_eq!(
            Operation::from_wire("multiplication", Some(0.5)).unwrap(),
            Operation::ScaledMultiply(0.5)
        );
    }

    #[test]
    fn test_unknown_operation() {
        let err = "division".parse::<Operation>().expect_err("unsupported");
        assert!(matches!(err, CipherpathError::UnsupportedOperation(ref s) if s == "division"));
    }

    #[test]
    fn test_non_finite_factor_rejected() {
        assert!(Operation::from_wire("multiplication", Some(f64::NAN)).is_err());
        assert!(Operation::from_wire("multiplication", Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(Operation::Sum.output_rows(10), 1);
        assert_eq!(Operation::Average.output_rows(10), 1);
        assert_eq!(Operation::AverageBroadcast.output_rows(10), 10);
        assert_eq!(Operation::ScaledMultiply(3.0).output_rows(10), 10);
        assert!(Operation::AverageBroadcast.is_reduction());
        assert!(!Operation::ScaledMultiply(3.0).is_reduction());
    }
}
