//! Configuration access port trait.

use crate::domain::error::BondError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// Like `get_string`, but a missing or blank value is a `ConfigMissing` error.
    fn require_string(&self, section: &str, key: &str) -> Result<String, BondError> {
        match self.get_string(section, key) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(BondError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Non-negative integer with a default; negative values are `ConfigInvalid`.
    fn get_u64(&self, section: &str, key: &str, default: u64) -> Result<u64, BondError> {
        let fallback = i64::try_from(default).unwrap_or(i64::MAX);
        u64::try_from(self.get_int(section, key, fallback)).map_err(|_| BondError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: "must be non-negative".to_string(),
        })
    }
}
