//! Bond pricing: primary subscription price and secondary (resale) price.
//!
//! Secondary pricing is face value plus simple interest accrued in whole days
//! since the series start, with the interest term rounded up. Quotes and
//! settlement go through these same functions.

use crate::domain::error::BondError;
use crate::domain::units::TENTHS_PER_UNIT;

pub const MS_PER_DAY: i64 = 86_400_000;
pub const BPS_DENOMINATOR: u128 = 10_000;
pub const DAYS_PER_YEAR: u128 = 365;

/// `floor(face_value_tenths * amount_tenths / 10)`.
pub fn primary_price(face_value_tenths: u64, amount_tenths: u64) -> Result<u64, BondError> {
    let total = u128::from(face_value_tenths) * u128::from(amount_tenths)
        / u128::from(TENTHS_PER_UNIT);
    narrow(total)
}

/// Whole days elapsed since `start_ms`; partial days and negative spans count as zero.
pub fn accrued_days(start_ms: i64, now_ms: i64) -> u64 {
    let elapsed = now_ms.saturating_sub(start_ms);
    if elapsed <= 0 {
        return 0;
    }
    (elapsed / MS_PER_DAY) as u64
}

/// Simple interest on `principal_tenths`, rounded up to the next tenth.
pub fn accrued_interest(principal_tenths: u64, rate_bps: u32, days: u64) -> Result<u64, BondError> {
    let numerator = u128::from(principal_tenths)
        .checked_mul(u128::from(rate_bps))
        .and_then(|v| v.checked_mul(u128::from(days)))
        .ok_or_else(|| BondError::validation("interest computation overflowed"))?;
    narrow(ceil_div(numerator, BPS_DENOMINATOR * DAYS_PER_YEAR))
}

pub fn secondary_price(
    face_value_tenths: u64,
    rate_bps: u32,
    start_ms: i64,
    now_ms: i64,
    amount_tenths: u64,
) -> Result<u64, BondError> {
    let face = primary_price(face_value_tenths, amount_tenths)?;
    let interest = accrued_interest(face, rate_bps, accrued_days(start_ms, now_ms))?;
    face.checked_add(interest)
        .ok_or_else(|| BondError::validation("secondary price overflowed"))
}

fn ceil_div(numerator: u128, denominator: u128) -> u128 {
    numerator.div_ceil(denominator)
}

fn narrow(value: u128) -> Result<u64, BondError> {
    u64::try_from(value).map_err(|_| BondError::validation("price exceeds representable range"))
}

/// A priced quote, as shown to a buyer before settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub amount_tenths: u64,
    pub face_tenths: u64,
    pub interest_tenths: u64,
    pub total_tenths: u64,
    pub accrued_days: u64,
}

impl Quote {
    pub fn primary(face_value_tenths: u64, amount_tenths: u64) -> Result<Self, BondError> {
        let face = primary_price(face_value_tenths, amount_tenths)?;
        Ok(Quote {
            amount_tenths,
            face_tenths: face,
            interest_tenths: 0,
            total_tenths: face,
            accrued_days: 0,
        })
    }

    pub fn secondary(
        face_value_tenths: u64,
        rate_bps: u32,
        start_ms: i64,
        now_ms: i64,
        amount_tenths: u64,
    ) -> Result<Self, BondError> {
        let face = primary_price(face_value_tenths, amount_tenths)?;
        let days = accrued_days(start_ms, now_ms);
        let interest = accrued_interest(face, rate_bps, days)?;
        let total = secondary_price(face_value_tenths, rate_bps, start_ms, now_ms, amount_tenths)?;
        Ok(Quote {
            amount_tenths,
            face_tenths: face,
            interest_tenths: interest,
            total_tenths: total,
            accrued_days: days,
        })
    }
}
