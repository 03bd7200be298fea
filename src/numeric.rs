//! Arbitrary-precision numeric primitives.
//!
//! The codec and the iteration engine never touch MPFR directly. They are
//! written against the [`Numeric`] trait, which fixes the contract an
//! arbitrary-precision backend must satisfy:
//!
//! - every operation takes the target precision in bits explicitly
//! - every operation rounds to nearest, ties to even
//! - NaN and the infinities propagate with IEEE-754 semantics
//!
//! [`MpFloat`] is the production implementation on top of `rug::Float`.

use std::cmp::Ordering;
use std::fmt;

use rug::float::{self, Special};
use rug::Float;
use thiserror::Error;

/// Errors raised by a numeric backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumericError {
    /// The requested precision is outside what the backend supports.
    #[error("Precision {precision} outside supported range {min}..={max}")]
    PrecisionOutOfRange {
        precision: u32,
        min: u32,
        max: u32,
    },

    /// The backend rejected already-validated numeric text.
    #[error("Backend failed to parse {text:?}: {reason}")]
    Parse { text: String, reason: String },

    /// The backend could not produce digits for a value.
    #[error("Backend failed to format value: {0}")]
    Format(String),
}

/// Coarse classification of a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberClass {
    Nan,
    Infinite,
    Zero,
    /// Finite and nonzero.
    Normal,
}

/// Digit view of a finite nonzero value.
///
/// `value = (-1)^negative * 0.mantissa * radix^exponent`, with `mantissa`
/// free of leading and trailing zero digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digits {
    pub negative: bool,
    pub mantissa: String,
    pub exponent: i64,
}

impl Digits {
    /// Build a normalized digit view from raw backend output.
    ///
    /// Leading zeros shift the exponent down, trailing zeros are dropped and
    /// digits are lower-cased. An all-zero mantissa is a format error since
    /// zero never has a digit view.
    pub fn normalize(negative: bool, raw: &str, exponent: i64) -> Result<Self, NumericError> {
        let raw = raw.to_ascii_lowercase();
        let leading = raw.len() - raw.trim_start_matches('0').len();
        let mantissa = raw.trim_matches('0');

        if mantissa.is_empty() {
            return Err(NumericError::Format(format!(
                "no significant digits in {:?}",
                raw
            )));
        }
        if !mantissa.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(NumericError::Format(format!(
                "unexpected characters in {:?}",
                raw
            )));
        }

        Ok(Self {
            negative,
            mantissa: mantissa.to_string(),
            exponent: exponent - leading as i64,
        })
    }
}

/// Arbitrary-precision real number backend.
///
/// Implementations are value types: every operation returns a new value and
/// leaves its operands untouched.
pub trait Numeric: Clone + fmt::Debug + PartialOrd + Sized {
    /// Parse canonical text `[-]int[.frac][@[+|-]exp]` in `radix` (2..=36).
    ///
    /// The codec validates the grammar before calling this, so a failure
    /// here is a backend problem rather than bad input.
    fn parse(text: &str, radix: u32, precision: u32) -> Result<Self, NumericError>;

    /// Not-a-number at `precision`.
    fn nan(precision: u32) -> Result<Self, NumericError>;

    /// Positive or negative infinity at `precision`.
    fn infinity(negative: bool, precision: u32) -> Result<Self, NumericError>;

    /// Positive zero at `precision`.
    fn zero(precision: u32) -> Result<Self, NumericError>;

    fn class(&self) -> NumberClass;

    /// Sign bit, including the sign of zero and infinities.
    fn is_sign_negative(&self) -> bool;

    fn add(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError>;

    fn sub(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError>;

    fn mul(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError>;

    fn square(&self, precision: u32) -> Result<Self, NumericError>;

    /// `2 * self`, exact unless it overflows.
    fn double(&self, precision: u32) -> Result<Self, NumericError>;

    fn sqrt(&self, precision: u32) -> Result<Self, NumericError>;

    /// Shortest digit string in `radix` that reads back to this value.
    ///
    /// Only defined for [`NumberClass::Normal`] values.
    fn digits(&self, radix: u32) -> Result<Digits, NumericError>;

    fn is_finite(&self) -> bool {
        matches!(self.class(), NumberClass::Zero | NumberClass::Normal)
    }

    /// `self > rhs`, false whenever either side is NaN.
    fn exceeds(&self, rhs: &Self) -> bool {
        matches!(self.partial_cmp(rhs), Some(Ordering::Greater))
    }
}

/// MPFR-backed [`Numeric`] implementation.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct MpFloat(Float);

impl MpFloat {
    /// Wrap an existing `rug::Float`.
    pub fn from_float(value: Float) -> Self {
        Self(value)
    }

    pub fn as_float(&self) -> &Float {
        &self.0
    }
}

/// Reject precisions MPFR cannot represent before `rug` would panic on them.
pub fn check_precision(precision: u32) -> Result<u32, NumericError> {
    let (min, max) = (float::prec_min(), float::prec_max());
    if precision < min || precision > max {
        return Err(NumericError::PrecisionOutOfRange {
            precision,
            min,
            max,
        });
    }
    Ok(precision)
}

impl Numeric for MpFloat {
    fn parse(text: &str, radix: u32, precision: u32) -> Result<Self, NumericError> {
        let precision = check_precision(precision)?;
        let parsed = Float::parse_radix(text, radix as i32).map_err(|e| NumericError::Parse {
            text: text.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(Float::with_val(precision, parsed)))
    }

    fn nan(precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, Special::Nan)))
    }

    fn infinity(negative: bool, precision: u32) -> Result<Self, NumericError> {
        let special = if negative {
            Special::NegInfinity
        } else {
            Special::Infinity
        };
        Ok(Self(Float::with_val(check_precision(precision)?, special)))
    }

    fn zero(precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, Special::Zero)))
    }

    fn class(&self) -> NumberClass {
        if self.0.is_nan() {
            NumberClass::Nan
        } else if self.0.is_infinite() {
            NumberClass::Infinite
        } else if self.0.is_zero() {
            NumberClass::Zero
        } else {
            NumberClass::Normal
        }
    }

    fn is_sign_negative(&self) -> bool {
        self.0.is_sign_negative()
    }

    fn add(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, &self.0 + &rhs.0)))
    }

    fn sub(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, &self.0 - &rhs.0)))
    }

    fn mul(&self, rhs: &Self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, &self.0 * &rhs.0)))
    }

    fn square(&self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, self.0.square_ref())))
    }

    fn double(&self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, &self.0 * 2u32)))
    }

    fn sqrt(&self, precision: u32) -> Result<Self, NumericError> {
        Ok(Self(Float::with_val(check_precision(precision)?, self.0.sqrt_ref())))
    }

    fn digits(&self, radix: u32) -> Result<Digits, NumericError> {
        if self.class() != NumberClass::Normal {
            return Err(NumericError::Format(format!(
                "{:?} value has no digit view",
                self.class()
            )));
        }
        if !(2..=36).contains(&radix) {
            return Err(NumericError::Format(format!("unsupported radix {}", radix)));
        }

        let (negative, raw, exponent) = self.0.to_sign_string_exp(radix as i32, None);
        let exponent = exponent
            .ok_or_else(|| NumericError::Format("backend returned no exponent".to_string()))?;
        Digits::normalize(negative, &raw, i64::from(exponent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mp(text: &str, radix: u32) -> MpFloat {
        MpFloat::parse(text, radix, 64).expect("parse")
    }

    #[test]
    fn test_normalize_strips_zeros_and_shifts_exponent() {
        let digits = Digits::normalize(false, "00A80", 3).unwrap();
        assert_eq!(
            digits,
            Digits {
                negative: false,
                mantissa: "a8".to_string(),
                exponent: 1,
            }
        );
    }

    #[test]
    fn test_normalize_rejects_all_zero_mantissa() {
        assert!(matches!(
            Digits::normalize(false, "000", 0),
            Err(NumericError::Format(_))
        ));
    }

    #[test]
    fn test_precision_bounds() {
        assert!(check_precision(0).is_err());
        assert_eq!(check_precision(64).unwrap(), 64);
        assert!(matches!(
            MpFloat::zero(0),
            Err(NumericError::PrecisionOutOfRange { precision: 0, .. })
        ));
    }

    #[test]
    fn test_digits_of_six_and_a_half() {
        // 6.5 = 0.68 (hex) * 16^1
        let value = mp("6.5", 10);
        let digits = value.digits(16).unwrap();
        assert_eq!(digits.mantissa, "68");
        assert_eq!(digits.exponent, 1);
        assert!(!digits.negative);
    }

    #[test]
    fn test_digits_undefined_for_specials() {
        assert!(MpFloat::nan(64).unwrap().digits(32).is_err());
        assert!(MpFloat::zero(64).unwrap().digits(32).is_err());
        assert!(MpFloat::infinity(true, 64).unwrap().digits(10).is_err());
    }

    #[test]
    fn test_arithmetic_matches_exact_results() {
        let three = mp("3", 10);
        let four = mp("4", 10);
        let five = three.square(64).unwrap().add(&four.square(64).unwrap(), 64).unwrap();
        assert_eq!(five.sqrt(64).unwrap(), mp("5", 10));
        assert_eq!(three.mul(&four, 64).unwrap().double(64).unwrap(), mp("24", 10));
        assert_eq!(three.sub(&four, 64).unwrap(), mp("-1", 10));
    }

    #[test]
    fn test_rounding_happens_at_requested_precision() {
        // 1 + 2^-10 needs 11 bits; at 8 bits it rounds back to 1.
        let one = MpFloat::parse("1", 10, 8).unwrap();
        let tiny = MpFloat::parse("0.0009765625", 10, 8).unwrap();
        assert_eq!(one.add(&tiny, 8).unwrap(), one);
        assert_ne!(one.add(&tiny, 16).unwrap(), one);
    }

    #[test]
    fn test_nan_is_unordered() {
        let nan = MpFloat::nan(64).unwrap();
        assert_eq!(nan.partial_cmp(&nan), None);
        assert!(!nan.exceeds(&mp("0", 10)));
        assert!(!mp("0", 10).exceeds(&nan));
        assert_eq!(nan.class(), NumberClass::Nan);
    }

    #[test]
    fn test_class_and_sign() {
        assert_eq!(mp("-0", 10).class(), NumberClass::Zero);
        assert!(mp("-0", 10).is_sign_negative());
        assert_eq!(mp("-2", 10).class(), NumberClass::Normal);
        assert!(MpFloat::infinity(true, 64).unwrap().is_sign_negative());
        assert!(!MpFloat::infinity(false, 64).unwrap().is_finite());
    }
}
