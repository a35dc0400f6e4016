//! Resource quantity parsing and canonical formatting
//!
//! `k8s-openapi` carries quantities as opaque strings, but the API server
//! normalizes them on write: `"0.5"` is stored as `"500m"`, `"1024Mi"` as
//! `"1Gi"`. Comparing a live container's resources against the values in an
//! AtlasMap therefore has to go through the same normalization, otherwise
//! every pass would see drift.
//!
//! Values are held as a signed count of nano-units. Anything finer than one
//! nano-unit is rounded up, as the API server does.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Nano-units per whole unit
const NANOS: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$', got {0:?}")]
    Malformed(String),
    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// Notation a quantity was written in; it drives the canonical rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// `m`, `k`, `M`, ... or no suffix
    DecimalSi,
    /// `Ki`, `Mi`, `Gi`, ...
    BinarySi,
    /// `e3`, `E-2`, ...
    DecimalExponent,
}

#[derive(Debug, Clone, Copy)]
enum Multiplier {
    PowerOfTen(i32),
    PowerOfTwo(u32),
}

/// A parsed quantity that renders in canonical form through `Display`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalQuantity {
    nanos: i128,
    format: QuantityFormat,
}

impl CanonicalQuantity {
    /// The zero quantity, used when a field is left unset
    pub fn zero() -> Self {
        Self {
            nanos: 0,
            format: QuantityFormat::DecimalSi,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }
}

impl FromStr for CanonicalQuantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_quantity(s)
    }
}

fn parse_suffix(input: &str, suffix: &str) -> Result<(QuantityFormat, Multiplier), QuantityError> {
    use Multiplier::{PowerOfTen, PowerOfTwo};
    use QuantityFormat::{BinarySi, DecimalExponent, DecimalSi};

    let parsed = match suffix {
        "" => (DecimalSi, PowerOfTen(0)),
        "n" => (DecimalSi, PowerOfTen(-9)),
        "u" => (DecimalSi, PowerOfTen(-6)),
        "m" => (DecimalSi, PowerOfTen(-3)),
        "k" => (DecimalSi, PowerOfTen(3)),
        "M" => (DecimalSi, PowerOfTen(6)),
        "G" => (DecimalSi, PowerOfTen(9)),
        "T" => (DecimalSi, PowerOfTen(12)),
        "P" => (DecimalSi, PowerOfTen(15)),
        "E" => (DecimalSi, PowerOfTen(18)),
        "Ki" => (BinarySi, PowerOfTwo(10)),
        "Mi" => (BinarySi, PowerOfTwo(20)),
        "Gi" => (BinarySi, PowerOfTwo(30)),
        "Ti" => (BinarySi, PowerOfTwo(40)),
        "Pi" => (BinarySi, PowerOfTwo(50)),
        "Ei" => (BinarySi, PowerOfTwo(60)),
        other => {
            let exponent = other
                .strip_prefix(['e', 'E'])
                .and_then(|e| e.parse::<i32>().ok())
                .ok_or_else(|| QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: other.to_string(),
                })?;
            (DecimalExponent, PowerOfTen(exponent))
        }
    };
    Ok(parsed)
}

/// Parses a quantity string such as `"500m"`, `"0.5"`, `"256Mi"` or `"1e3"`.
pub fn parse_quantity(input: &str) -> Result<CanonicalQuantity, QuantityError> {
    let malformed = || QuantityError::Malformed(input.to_string());
    let out_of_range = || QuantityError::OutOfRange(input.to_string());

    let (negative, unsigned) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        Some(_) => (false, input),
        None => return Err(malformed()),
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(malformed());
    }

    let (format, multiplier) = parse_suffix(input, suffix)?;

    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(i128::from(digit - b'0')))
            .ok_or_else(out_of_range)?;
    }

    // Shift from "digits with the decimal point removed" to nano-units
    let mut exponent = 9 - i32::try_from(fraction.len()).map_err(|_| out_of_range())?;
    match multiplier {
        Multiplier::PowerOfTen(e) => exponent = exponent.checked_add(e).ok_or_else(out_of_range)?,
        Multiplier::PowerOfTwo(bits) => {
            mantissa = mantissa
                .checked_mul(1i128 << bits)
                .ok_or_else(out_of_range)?
        }
    }

    let magnitude = if exponent >= 0 {
        10i128
            .checked_pow(exponent.unsigned_abs())
            .and_then(|scale| mantissa.checked_mul(scale))
            .ok_or_else(out_of_range)?
    } else {
        match 10i128.checked_pow(exponent.unsigned_abs()) {
            // round up anything finer than a nano-unit
            Some(scale) => mantissa / scale + i128::from(mantissa % scale != 0),
            None => i128::from(mantissa > 0),
        }
    };

    Ok(CanonicalQuantity {
        nanos: if negative { -magnitude } else { magnitude },
        format,
    })
}

fn decimal_suffix(exponent: i32) -> &'static str {
    match exponent {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

impl fmt::Display for CanonicalQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        // Small or fractional binary values fall back to decimal notation
        // so that no precision is lost.
        let format = match self.format {
            QuantityFormat::BinarySi
                if self.nanos.unsigned_abs() < (1024 * NANOS) as u128 || self.nanos % NANOS != 0 =>
            {
                QuantityFormat::DecimalSi
            }
            other => other,
        };

        if format == QuantityFormat::BinarySi {
            let mut value = self.nanos / NANOS;
            let mut power = 0;
            while power + 1 < BINARY_SUFFIXES.len() && value % 1024 == 0 {
                value /= 1024;
                power += 1;
            }
            return write!(f, "{value}{}", BINARY_SUFFIXES[power]);
        }

        let mut value = self.nanos;
        let mut exponent = -9;
        while exponent < 18 && value % 1000 == 0 {
            value /= 1000;
            exponent += 3;
        }

        match format {
            QuantityFormat::DecimalExponent if exponent != 0 => write!(f, "{value}e{exponent}"),
            QuantityFormat::DecimalExponent => write!(f, "{value}"),
            _ => write!(f, "{value}{}", decimal_suffix(exponent)),
        }
    }
}
