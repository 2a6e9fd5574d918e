//! Resource quantities
//!
//! Parses and formats the Kubernetes quantity notation (`150m`, `256Mi`,
//! `10k`, `1e3`). Values are held exactly in nano-units and remember the
//! suffix family they were written in, so a quantity prints back the way the
//! caller wrote it.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

const NANOS: i128 = 1_000_000_000;

const BINARY_SUFFIXES: &[(u32, &str)] = &[
    (10, "Ki"),
    (20, "Mi"),
    (30, "Gi"),
    (40, "Ti"),
    (50, "Pi"),
    (60, "Ei"),
];

/// Suffix family a quantity is rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Powers of 1024 (`Ki`, `Mi`, ...)
    BinarySI,
    /// Powers of 1000 (`m`, `k`, `M`, ...)
    DecimalSI,
    /// Scientific notation (`1e3`)
    DecimalExponent,
}

/// Errors raised while parsing a quantity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,
    #[error("quantity {0:?} does not start with a number")]
    InvalidNumber(String),
    #[error("quantity {0:?} has an unknown suffix")]
    UnknownSuffix(String),
    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// A fixed-point resource quantity
#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

enum Scale {
    Binary(u32),
    Decimal(i32, Format),
}

impl Scale {
    fn from_suffix(suffix: &str) -> Option<Self> {
        let scale = match suffix {
            "" => Scale::Decimal(0, Format::DecimalSI),
            "n" => Scale::Decimal(-9, Format::DecimalSI),
            "u" => Scale::Decimal(-6, Format::DecimalSI),
            "m" => Scale::Decimal(-3, Format::DecimalSI),
            "k" => Scale::Decimal(3, Format::DecimalSI),
            "M" => Scale::Decimal(6, Format::DecimalSI),
            "G" => Scale::Decimal(9, Format::DecimalSI),
            "T" => Scale::Decimal(12, Format::DecimalSI),
            "P" => Scale::Decimal(15, Format::DecimalSI),
            "E" => Scale::Decimal(18, Format::DecimalSI),
            "Ki" => Scale::Binary(10),
            "Mi" => Scale::Binary(20),
            "Gi" => Scale::Binary(30),
            "Ti" => Scale::Binary(40),
            "Pi" => Scale::Binary(50),
            "Ei" => Scale::Binary(60),
            _ => {
                let exponent = suffix
                    .strip_prefix('e')
                    .or_else(|| suffix.strip_prefix('E'))?;
                Scale::Decimal(exponent.parse().ok()?, Format::DecimalExponent)
            }
        };
        Some(scale)
    }

    fn format(&self) -> Format {
        match self {
            Scale::Binary(_) => Format::BinarySI,
            Scale::Decimal(_, format) => *format,
        }
    }

    /// Convert `mantissa * 10^-fraction_digits` in this scale to nano-units,
    /// rounding up anything finer than a nano-unit.
    fn to_nanos(&self, mantissa: i128, fraction_digits: usize) -> Option<i128> {
        match self {
            Scale::Decimal(exponent, _) => {
                let shift = 9 + i64::from(*exponent) - fraction_digits as i64;
                if shift >= 0 {
                    mantissa.checked_mul(10i128.checked_pow(u32::try_from(shift).ok()?)?)
                } else {
                    match 10i128.checked_pow(u32::try_from(-shift).ok()?) {
                        Some(divisor) => Some(ceil_div(mantissa, divisor)),
                        None => Some(i128::from(mantissa > 0)),
                    }
                }
            }
            Scale::Binary(bits) => {
                let numerator = mantissa.checked_mul(1i128 << bits)?.checked_mul(NANOS)?;
                let divisor = 10i128.checked_pow(u32::try_from(fraction_digits).ok()?)?;
                Some(ceil_div(numerator, divisor))
            }
        }
    }
}

fn ceil_div(numerator: i128, divisor: i128) -> i128 {
    numerator / divisor + i128::from(numerator % divisor > 0)
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl Quantity {
    /// A plain integer quantity, rendered without a suffix
    pub fn from_int(value: i64) -> Self {
        Self {
            nanos: i128::from(value) * NANOS,
            format: Format::DecimalSI,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Integer value, rounded up
    pub fn value(&self) -> i64 {
        saturate(ceil_div(self.nanos, NANOS))
    }

    /// Value in thousandths, rounded up
    pub fn milli_value(&self) -> i64 {
        saturate(ceil_div(self.nanos, 1_000_000))
    }

    pub fn as_f64(&self) -> f64 {
        self.nanos as f64 / NANOS as f64
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));

        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let scale = Scale::from_suffix(suffix)
            .ok_or_else(|| QuantityError::UnknownSuffix(input.to_string()))?;

        let mut mantissa: i128 = 0;
        for digit in whole.bytes().chain(fraction.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;
        }

        let nanos = scale
            .to_nanos(mantissa, fraction.len())
            .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
            format: scale.format(),
        })
    }
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

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        let sign = if self.nanos < 0 { "-" } else { "" };
        let magnitude = self.nanos.unsigned_abs();

        // Fractional binary values fall back to decimal SI.
        if self.format == Format::BinarySI && magnitude % NANOS as u128 == 0 {
            let units = magnitude / NANOS as u128;
            for (bits, suffix) in BINARY_SUFFIXES.iter().rev() {
                let factor = 1u128 << bits;
                if units % factor == 0 {
                    return write!(f, "{}{}{}", sign, units / factor, suffix);
                }
            }
            return write!(f, "{}{}", sign, units);
        }

        for exponent in (-9..=18).rev().step_by(3) {
            let factor = 10u128.pow((exponent + 9) as u32);
            if magnitude % factor != 0 {
                continue;
            }
            let scaled = magnitude / factor;
            return match (self.format, exponent) {
                (Format::DecimalExponent, 0) => write!(f, "{}{}", sign, scaled),
                (Format::DecimalExponent, _) => write!(f, "{}{}e{}", sign, scaled, exponent),
                _ => write!(f, "{}{}{}", sign, scaled, decimal_suffix(exponent)),
            };
        }

        unreachable!("a factor of 1 always divides")
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_profiling_results_print_back_unchanged() {
        for raw in ["150m", "256Mi", "10k", "5k", "0", "3", "1Gi", "2500u", "7n"] {
            assert_eq!(q(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_canonicalizes_within_family() {
        assert_eq!(q("1000m").to_string(), "1");
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1500").to_string(), "1500");
        assert_eq!(q("0.5").to_string(), "500m");
        assert_eq!(q("1.5k").to_string(), "1500");
        assert_eq!(q("-250m").to_string(), "-250m");
    }

    #[test]
    fn test_binary_fraction_falls_back_to_decimal() {
        // 0.5Ki = 512 bytes, still an integer
        assert_eq!(q("0.5Ki").to_string(), "512");
        assert_eq!(q("1000Ki").to_string(), "1000Ki");
    }

    #[test]
    fn test_exponent_notation() {
        assert_eq!(q("1e3").format(), Format::DecimalExponent);
        assert_eq!(q("1e3").to_string(), "1e3");
        assert_eq!(q("12E6").value(), 12_000_000);
        assert_eq!(q("5e0").to_string(), "5");
    }

    #[test]
    fn test_values() {
        assert_eq!(q("150m").milli_value(), 150);
        assert_eq!(q("150m").value(), 1);
        assert_eq!(q("256Mi").value(), 256 * 1024 * 1024);
        assert_eq!(q("10k").value(), 10_000);
        assert_eq!(q("99").value(), 99);
        assert_eq!(Quantity::from_int(1000).value(), 1000);
        assert_eq!(Quantity::from_int(1000).to_string(), "1k");
        assert!((q("1.5").as_f64() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sub_nano_rounds_up() {
        assert_eq!(q("0.1n").to_string(), "1n");
    }

    #[test]
    fn test_equality_ignores_format() {
        assert_eq!(q("1Ki"), q("1024"));
        assert_eq!(q("1k"), q("1e3"));
        assert!(q("1Mi") > q("1M"));
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!(matches!(
            "abc".parse::<Quantity>(),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            "1.2.3".parse::<Quantity>(),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            "5x".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            "--1".parse::<Quantity>(),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            "1 Mi".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            "1e99".parse::<Quantity>(),
            Err(QuantityError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&q("256Mi")).unwrap();
        assert_eq!(json, "\"256Mi\"");
        let back: Quantity = serde_json::from_str("\"150m\"").unwrap();
        assert_eq!(back.milli_value(), 150);
        assert!(serde_json::from_str::<Quantity>("\"bogus\"").is_err());
    }
}
