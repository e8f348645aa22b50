//! Configuration validation.
//!
//! Checks every section up front so a bad deployment fails before any key
//! material is touched or any chain call is made.

use crate::domain::chain::ContractObjects;
use crate::domain::error::BondError;
use crate::domain::sponsorship::SponsorPolicy;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_POOL_SIZE: u64 = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Validates the sections needed to sign and submit transactions.
pub fn validate_config(config: &dyn ConfigPort) -> Result<(), BondError> {
    validate_database(config)?;
    validate_vault(config)?;
    validate_chain(config)?;
    validate_sponsor(config)?;
    Ok(())
}

pub fn validate_database(config: &dyn ConfigPort) -> Result<(), BondError> {
    config.require_string("database", "path")?;
    let pool_size = config.get_u64("database", "pool_size", DEFAULT_POOL_SIZE)?;
    if pool_size == 0 {
        return Err(invalid("database", "pool_size", "pool_size must be at least 1"));
    }
    Ok(())
}

pub fn validate_vault(config: &dyn ConfigPort) -> Result<(), BondError> {
    let secret = config.require_string("vault", "server_secret")?;
    if secret.len() < 16 {
        return Err(invalid(
            "vault",
            "server_secret",
            "server_secret must be at least 16 characters",
        ));
    }
    Ok(())
}

pub fn validate_chain(config: &dyn ConfigPort) -> Result<(), BondError> {
    let endpoint = config.require_string("chain", "endpoint")?;
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(invalid("chain", "endpoint", "endpoint must be an http(s) URL"));
    }
    if config.get_u64("chain", "timeout_secs", DEFAULT_TIMEOUT_SECS)? == 0 {
        return Err(invalid("chain", "timeout_secs", "timeout_secs must be positive"));
    }
    contract_objects(config)?;
    Ok(())
}

pub fn validate_sponsor(config: &dyn ConfigPort) -> Result<(), BondError> {
    config.require_string("sponsor", "encrypted_mnemonic")?;
    let policy = sponsor_policy(config)?;
    if policy.top_up == 0 {
        return Err(invalid("sponsor", "top_up", "top_up must be positive"));
    }
    if policy.top_up < policy.min_balance {
        return Err(invalid(
            "sponsor",
            "top_up",
            "top_up must be at least min_balance",
        ));
    }
    Ok(())
}

pub fn contract_objects(config: &dyn ConfigPort) -> Result<ContractObjects, BondError> {
    Ok(ContractObjects {
        package_id: object_id(config, "package_id")?,
        registry_id: object_id(config, "registry_id")?,
        admin_cap_id: object_id(config, "admin_cap_id")?,
        treasury_cap_id: object_id(config, "treasury_cap_id")?,
    })
}

pub fn sponsor_policy(config: &dyn ConfigPort) -> Result<SponsorPolicy, BondError> {
    let defaults = SponsorPolicy::default();
    Ok(SponsorPolicy {
        min_balance: config.get_u64("sponsor", "min_balance", defaults.min_balance)?,
        top_up: config.get_u64("sponsor", "top_up", defaults.top_up)?,
    })
}

fn object_id(config: &dyn ConfigPort, key: &str) -> Result<String, BondError> {
    let value = config.require_string("chain", key)?;
    let hex_part = value
        .strip_prefix("0x")
        .ok_or_else(|| invalid("chain", key, "object id must start with 0x"))?;
    if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("chain", key, "object id must be hex"));
    }
    Ok(value)
}

fn invalid(section: &str, key: &str, reason: &str) -> BondError {
    BondError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
