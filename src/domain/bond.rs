//! Bond series definition.

use crate::domain::error::BondError;
use crate::domain::pricing::MS_PER_DAY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondSeries {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub face_value_tenths: u64,
    pub rate_bps: u32,
    pub tenure_days: u32,
    pub issuer_address: String,
    pub start_ms: i64,
    pub total_supply_tenths: u64,
    pub allocated_tenths: u64,
}

impl BondSeries {
    pub fn maturity_ms(&self) -> i64 {
        self.start_ms
            .saturating_add(i64::from(self.tenure_days).saturating_mul(MS_PER_DAY))
    }

    pub fn is_matured(&self, now_ms: i64) -> bool {
        now_ms >= self.maturity_ms()
    }

    pub fn remaining_tenths(&self) -> u64 {
        self.total_supply_tenths.saturating_sub(self.allocated_tenths)
    }

    /// Checks that `units_tenths` more can be allocated without exceeding supply.
    pub fn check_allocation(&self, units_tenths: u64) -> Result<(), BondError> {
        if units_tenths > self.remaining_tenths() {
            return Err(BondError::bounds(format!(
                "series {} has {} tenths remaining, requested {}",
                self.id,
                self.remaining_tenths(),
                units_tenths
            )));
        }
        Ok(())
    }
}

/// Issuer-supplied parameters for a new series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTerms {
    pub symbol: String,
    pub name: String,
    pub face_value_tenths: u64,
    pub rate_bps: u32,
    pub tenure_days: u32,
    pub issuer_address: String,
    pub start_ms: i64,
    pub total_supply_tenths: u64,
}

impl SeriesTerms {
    pub fn validate(&self) -> Result<(), BondError> {
        if self.symbol.trim().is_empty() {
            return Err(BondError::validation("series symbol must not be empty"));
        }
        if self.face_value_tenths == 0 {
            return Err(BondError::validation("face value must be positive"));
        }
        if self.total_supply_tenths == 0 {
            return Err(BondError::validation("total supply must be positive"));
        }
        if self.tenure_days == 0 {
            return Err(BondError::validation("tenure must be at least one day"));
        }
        if self.issuer_address.trim().is_empty() {
            return Err(BondError::validation("issuer address must not be empty"));
        }
        Ok(())
    }

    pub fn into_series(self, id: String) -> BondSeries {
        BondSeries {
            id,
            symbol: self.symbol,
            name: self.name,
            face_value_tenths: self.face_value_tenths,
            rate_bps: self.rate_bps,
            tenure_days: self.tenure_days,
            issuer_address: self.issuer_address,
            start_ms: self.start_ms,
            total_supply_tenths: self.total_supply_tenths,
            allocated_tenths: 0,
        }
    }
}
