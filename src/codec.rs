//! Base-32 and decimal text codec for arbitrary-precision numbers.
//!
//! # Grammar
//!
//! ```text
//! ['-'] digits ['.' digits] ['@' ['+'|'-'] decimal-int]
//! @NaN@ | @Inf@ | -@Inf@
//! ```
//!
//! Base-32 digits are `0-9a-v`. The `@exp` suffix scales the mantissa by
//! `32^exp`, with the exponent itself always written in decimal. A base-32
//! mantissa without a point reads as a fraction when it carries an exponent,
//! so `5@1` is `0.5 * 32^1`, the value [`encode_scientific`] wrote it for.
//! With a point the mantissa is taken as written: `0.8@-1` is `0.8 * 32^-1`.
//! Decimal text also takes a leading `+`, `e`/`E` as exponent marker and a
//! point with digits on one side only (`.5`, `5.`).
//!
//! # Output forms
//!
//! There are two encoders and they are not interchangeable:
//!
//! - [`encode_scientific`] renders `mantissa@exp` (`5@1` is five). The
//!   iteration protocol speaks this form.
//! - [`encode_positional`] renders an explicit radix point with literal
//!   zeros (`0.0g`, `100`). The base-32 to decimal conversion prints this form.

use std::fmt;

use thiserror::Error;

use crate::numeric::{Digits, MpFloat, NumberClass, Numeric, NumericError};

const NAN_TOKEN: &str = "@NaN@";
const INF_TOKEN: &str = "@Inf@";
const NEG_INF_TOKEN: &str = "-@Inf@";

/// Text radix understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    Decimal,
    Base32,
}

impl Radix {
    pub fn value(self) -> u32 {
        match self {
            Radix::Decimal => 10,
            Radix::Base32 => 32,
        }
    }

    /// Value of an ASCII digit in this radix. Letters are lower-case only.
    fn digit_value(self, byte: u8) -> Option<u32> {
        let value = match byte {
            b'0'..=b'9' => u32::from(byte - b'0'),
            b'a'..=b'z' => u32::from(byte - b'a') + 10,
            _ => return None,
        };
        (value < self.value()).then_some(value)
    }

    fn is_exponent_marker(self, byte: u8) -> bool {
        match self {
            Radix::Decimal => matches!(byte, b'@' | b'e' | b'E'),
            Radix::Base32 => byte == b'@',
        }
    }

    fn is_lenient(self) -> bool {
        self == Radix::Decimal
    }
}

impl fmt::Display for Radix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Text does not match the numeric grammar for the radix.
    #[error("Invalid base-{radix} number")]
    Invalid { radix: Radix, text: String },

    /// The numeric backend failed while parsing or formatting.
    #[error("Conversion failed: {0}")]
    Numeric(#[from] NumericError),
}

/// Result of scanning text against the grammar.
#[derive(Debug, PartialEq, Eq)]
enum Literal {
    Nan,
    Infinity { negative: bool },
    /// Canonical `[-]int[.frac][@[+|-]exp]` text for the backend.
    Finite(String),
}

fn take_digits<'t>(text: &'t str, radix: Radix, pos: &mut usize) -> &'t str {
    let bytes = text.as_bytes();
    let start = *pos;
    while *pos < bytes.len() && radix.digit_value(bytes[*pos]).is_some() {
        *pos += 1;
    }
    &text[start..*pos]
}

fn scan(text: &str, radix: Radix) -> Option<Literal> {
    match text {
        NAN_TOKEN => return Some(Literal::Nan),
        INF_TOKEN => return Some(Literal::Infinity { negative: false }),
        NEG_INF_TOKEN => return Some(Literal::Infinity { negative: true }),
        _ => {}
    }

    let bytes = text.as_bytes();
    let mut pos = 0;

    let negative = match bytes.first() {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') if radix.is_lenient() => {
            pos += 1;
            false
        }
        _ => false,
    };

    let integer = take_digits(text, radix, &mut pos);
    let mut fraction = "";
    let mut has_point = false;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        has_point = true;
        fraction = take_digits(text, radix, &mut pos);
    }

    let well_formed = if radix.is_lenient() {
        !(integer.is_empty() && fraction.is_empty())
    } else {
        !integer.is_empty() && (!has_point || !fraction.is_empty())
    };
    if !well_formed {
        return None;
    }

    let mut exponent = String::new();
    if pos < bytes.len() && radix.is_exponent_marker(bytes[pos]) {
        pos += 1;
        if let Some(&sign @ (b'+' | b'-')) = bytes.get(pos) {
            exponent.push(sign as char);
            pos += 1;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == start {
            return None;
        }
        exponent.push_str(&text[start..pos]);
    }

    if pos != bytes.len() {
        return None;
    }

    let mut canonical = String::with_capacity(text.len() + 4);
    if negative {
        canonical.push('-');
    }
    if radix == Radix::Base32 && !has_point && !exponent.is_empty() {
        // Compact-scientific mantissa: 0.digits.
        canonical.push_str("0.");
        canonical.push_str(integer);
    } else {
        canonical.push_str(if integer.is_empty() { "0" } else { integer });
        if !fraction.is_empty() {
            canonical.push('.');
            canonical.push_str(fraction);
        }
    }
    if !exponent.is_empty() {
        canonical.push('@');
        canonical.push_str(&exponent);
    }
    Some(Literal::Finite(canonical))
}

/// Decode `text` in `radix` at `precision` bits, rounding to nearest-even.
///
/// # Errors
///
/// - `CodecError::Invalid` if the text does not match the grammar
/// - `CodecError::Numeric` if the backend rejects the precision or fails
pub fn decode<N: Numeric>(text: &str, radix: Radix, precision: u32) -> Result<N, CodecError> {
    let literal = scan(text, radix).ok_or_else(|| CodecError::Invalid {
        radix,
        text: text.to_string(),
    })?;

    let value = match literal {
        Literal::Nan => N::nan(precision)?,
        Literal::Infinity { negative } => N::infinity(negative, precision)?,
        Literal::Finite(canonical) => N::parse(&canonical, radix.value(), precision)?,
    };
    Ok(value)
}

/// Fixed rendering for values without a digit view.
fn special_text<N: Numeric>(value: &N) -> Option<&'static str> {
    match value.class() {
        NumberClass::Nan => Some(NAN_TOKEN),
        NumberClass::Infinite if value.is_sign_negative() => Some(NEG_INF_TOKEN),
        NumberClass::Infinite => Some(INF_TOKEN),
        NumberClass::Zero => Some("0"),
        NumberClass::Normal => None,
    }
}

/// Render `value` as `[-]mantissa@exp`, meaning `0.mantissa * radix^exp`.
///
/// Zero of either sign is `"0"`; NaN and the infinities are their tokens.
pub fn encode_scientific<N: Numeric>(value: &N, radix: Radix) -> Result<String, CodecError> {
    if let Some(text) = special_text(value) {
        return Ok(text.to_string());
    }

    let Digits {
        negative,
        mantissa,
        exponent,
    } = value.digits(radix.value())?;
    let sign = if negative { "-" } else { "" };
    Ok(format!("{}{}@{}", sign, mantissa, exponent))
}

/// Render `value` with an explicit radix point and no exponent suffix.
///
/// Trailing zeros after the point are dropped, and so is a point left at
/// the end. Zero of either sign is `"0"`; NaN and the infinities are their
/// tokens.
pub fn encode_positional<N: Numeric>(value: &N, radix: Radix) -> Result<String, CodecError> {
    if let Some(text) = special_text(value) {
        return Ok(text.to_string());
    }

    let Digits {
        negative,
        mantissa,
        exponent,
    } = value.digits(radix.value())?;
    let len = mantissa.len() as i64;

    let mut out = String::with_capacity(mantissa.len() + 4);
    if negative {
        out.push('-');
    }
    if exponent <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-exponent) as usize));
        out.push_str(&mantissa);
    } else if exponent >= len {
        out.push_str(&mantissa);
        out.extend(std::iter::repeat('0').take((exponent - len) as usize));
    } else {
        let (whole, fraction) = mantissa.split_at(exponent as usize);
        out.push_str(whole);
        out.push('.');
        out.push_str(fraction);
    }

    strip_fraction_zeros(&mut out);
    Ok(out)
}

fn strip_fraction_zeros(text: &mut String) {
    if !text.contains('.') {
        return;
    }
    let kept = text.trim_end_matches('0').trim_end_matches('.').len();
    text.truncate(kept);
}

/// Parse decimal text and render it as compact-scientific base-32.
pub fn decimal_to_base32(text: &str, precision: u32) -> Result<String, CodecError> {
    let value: MpFloat = decode(text, Radix::Decimal, precision)?;
    encode_scientific(&value, Radix::Base32)
}

/// Parse base-32 text and render it as positional decimal.
pub fn base32_to_decimal(text: &str, precision: u32) -> Result<String, CodecError> {
    let value: MpFloat = decode(text, Radix::Base32, precision)?;
    encode_positional(&value, Radix::Decimal)
}
