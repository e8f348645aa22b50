//! Gas sponsorship for custodial wallets.
//!
//! Custodial wallets never hold gas of their own; before each transaction the
//! platform's sponsor wallet tops them up when they fall below a threshold.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::domain::chain::{ChainReceipt, CoinType};
use crate::domain::error::BondError;
use crate::domain::vault::CustodialVault;
use crate::ports::chain_port::ChainPort;

/// Thresholds in gas base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorPolicy {
    pub min_balance: u64,
    pub top_up: u64,
}

impl Default for SponsorPolicy {
    fn default() -> Self {
        SponsorPolicy {
            min_balance: 50_000_000,
            top_up: 200_000_000,
        }
    }
}

pub struct GasSponsor {
    encrypted_mnemonic: String,
    policy: SponsorPolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GasSponsor {
    pub fn new(encrypted_mnemonic: impl Into<String>, policy: SponsorPolicy) -> Self {
        GasSponsor {
            encrypted_mnemonic: encrypted_mnemonic.into(),
            policy,
            locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> SponsorPolicy {
        self.policy
    }

    /// Tops up `address` if its gas balance is below the policy minimum.
    ///
    /// Returns the transfer receipt, or `None` when no top-up was needed.
    /// Concurrent calls for one address are serialized so it is funded once;
    /// the address's lock is dropped again when the last caller finishes.
    pub fn ensure_gas(
        &self,
        chain: &dyn ChainPort,
        vault: &CustodialVault,
        address: &str,
    ) -> Result<Option<ChainReceipt>, BondError> {
        if chain.get_balance(address, CoinType::Gas)? >= self.policy.min_balance {
            return Ok(None);
        }

        let lock = self
            .locks
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.top_up(chain, vault, address)
        };
        drop(lock);
        // Only the map still holds the lock once no caller is waiting on it.
        self.locks.remove_if(address, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of addresses with a top-up in progress or waiting.
    pub fn pending_top_ups(&self) -> usize {
        self.locks.len()
    }

    fn top_up(
        &self,
        chain: &dyn ChainPort,
        vault: &CustodialVault,
        address: &str,
    ) -> Result<Option<ChainReceipt>, BondError> {
        // Another caller may have funded it while we waited.
        let balance = chain.get_balance(address, CoinType::Gas)?;
        if balance >= self.policy.min_balance {
            return Ok(None);
        }

        let sponsor = vault.restore(&self.encrypted_mnemonic)?;
        let required = self.policy.top_up.saturating_add(self.policy.min_balance);
        let available = chain.get_balance(sponsor.address(), CoinType::Gas)?;
        if available < required {
            tracing::error!(
                sponsor = sponsor.address(),
                available,
                required,
                "sponsor wallet underfunded"
            );
            return Err(BondError::InsufficientSponsorFunds {
                sponsor: sponsor.address().to_string(),
                available,
                required,
            });
        }

        let receipt = chain.transfer_gas(&sponsor, address, self.policy.top_up)?;
        tracing::info!(
            address,
            previous_balance = balance,
            amount = self.policy.top_up,
            digest = %receipt.digest,
            "gas top-up confirmed"
        );
        Ok(Some(receipt))
    }
}

impl std::fmt::Debug for GasSponsor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasSponsor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
