//! One-decimal fixed-point amounts ("tenths").
//!
//! Every unit count and money amount in the ledger is an integer number of
//! tenths. Human input is converted here and nowhere else.

use crate::domain::error::BondError;

pub const TENTHS_PER_UNIT: u64 = 10;

/// A human-entered amount, either numeric or textual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount<'a> {
    Number(f64),
    Text(&'a str),
}

impl From<f64> for Amount<'_> {
    fn from(value: f64) -> Self {
        Amount::Number(value)
    }
}

impl From<u32> for Amount<'_> {
    fn from(value: u32) -> Self {
        Amount::Number(f64::from(value))
    }
}

impl<'a> From<&'a str> for Amount<'a> {
    fn from(value: &'a str) -> Self {
        Amount::Text(value)
    }
}

impl<'a> From<&'a String> for Amount<'a> {
    fn from(value: &'a String) -> Self {
        Amount::Text(value.as_str())
    }
}

/// Converts a positive amount with at most one fractional digit into tenths.
pub fn to_tenths<'a>(value: impl Into<Amount<'a>>) -> Result<u64, BondError> {
    match value.into() {
        Amount::Number(n) => {
            if !n.is_finite() {
                return Err(BondError::validation(format!("{n} is not a finite number")));
            }
            // f64 Display never uses exponent notation and prints the shortest
            // representation that round-trips, so 2.5 becomes "2.5".
            parse_decimal(&n.to_string())
        }
        Amount::Text(s) => parse_decimal(s),
    }
}

fn parse_decimal(raw: &str) -> Result<u64, BondError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(BondError::validation("empty amount"));
    }

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (digits, None),
    };

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BondError::validation(format!("malformed amount {raw:?}")));
    }

    let frac_digit = match frac {
        None => 0,
        Some(f) if f.len() == 1 && f.as_bytes()[0].is_ascii_digit() => {
            u64::from(f.as_bytes()[0] - b'0')
        }
        Some(f) if f.len() > 1 && f.bytes().all(|b| b.is_ascii_digit()) => {
            return Err(BondError::validation(format!(
                "{raw:?} has more than one decimal place"
            )));
        }
        Some(_) => {
            return Err(BondError::validation(format!("malformed amount {raw:?}")));
        }
    };

    let whole: u64 = whole
        .parse()
        .map_err(|_| BondError::validation(format!("amount {raw:?} is too large")))?;

    let tenths = whole
        .checked_mul(TENTHS_PER_UNIT)
        .and_then(|t| t.checked_add(frac_digit))
        .ok_or_else(|| BondError::validation(format!("amount {raw:?} is too large")))?;

    if negative || tenths == 0 {
        return Err(BondError::validation(format!("amount {raw:?} must be positive")));
    }

    Ok(tenths)
}

/// Renders tenths as a decimal string, omitting a zero fractional digit.
pub fn format_tenths(tenths: u64) -> String {
    let whole = tenths / TENTHS_PER_UNIT;
    let frac = tenths % TENTHS_PER_UNIT;
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

/// Rejects a zero tenths count coming from another component.
pub fn ensure_positive(tenths: u64, what: &str) -> Result<u64, BondError> {
    if tenths == 0 {
        return Err(BondError::validation(format!("{what} must be positive")));
    }
    Ok(tenths)
}
