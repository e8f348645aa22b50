//! Wiring of stores, chain gateway, vault and sponsor shared by market flows.

use std::sync::Arc;

use crate::domain::error::BondError;
use crate::domain::sponsorship::GasSponsor;
use crate::domain::vault::CustodialSigner;
use crate::domain::vault::CustodialVault;
use crate::ports::chain_port::ChainPort;
use crate::ports::clock_port::Clock;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::wallet_port::WalletPort;

pub struct Platform {
    pub ledger: Arc<dyn LedgerPort>,
    pub wallets: Arc<dyn WalletPort>,
    pub chain: Arc<dyn ChainPort>,
    pub vault: Arc<CustodialVault>,
    pub sponsor: GasSponsor,
    pub clock: Arc<dyn Clock>,
    admin_encrypted_mnemonic: Option<String>,
}

impl Platform {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        wallets: Arc<dyn WalletPort>,
        chain: Arc<dyn ChainPort>,
        vault: Arc<CustodialVault>,
        sponsor: GasSponsor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Platform {
            ledger,
            wallets,
            chain,
            vault,
            sponsor,
            clock,
            admin_encrypted_mnemonic: None,
        }
    }

    /// Sets the sealed mnemonic of the wallet holding the admin and treasury caps.
    pub fn with_admin(mut self, encrypted_mnemonic: impl Into<String>) -> Self {
        self.admin_encrypted_mnemonic = Some(encrypted_mnemonic.into());
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn address_of(&self, user_id: &str) -> Result<String, BondError> {
        self.wallets
            .find_wallet_by_user(user_id)?
            .map(|w| w.address)
            .ok_or_else(|| BondError::not_found("wallet", user_id))
    }

    pub fn signer_for(&self, user_id: &str) -> Result<CustodialSigner, BondError> {
        self.vault.signer_for(self.wallets.as_ref(), user_id)
    }

    pub fn signer_for_address(&self, address: &str) -> Result<CustodialSigner, BondError> {
        let wallet = self
            .wallets
            .find_wallet_by_address(address)?
            .ok_or_else(|| BondError::not_found("wallet", address))?;
        self.signer_for(&wallet.user_id)
    }

    /// Restores a custodial signer and makes sure it can pay for gas.
    pub fn sponsored_signer(&self, address: &str) -> Result<CustodialSigner, BondError> {
        let signer = self.signer_for_address(address)?;
        self.sponsor
            .ensure_gas(self.chain.as_ref(), &self.vault, signer.address())?;
        Ok(signer)
    }

    pub fn admin_signer(&self) -> Result<CustodialSigner, BondError> {
        let sealed = self
            .admin_encrypted_mnemonic
            .as_deref()
            .ok_or_else(|| BondError::ConfigMissing {
                section: "chain".into(),
                key: "admin_encrypted_mnemonic".into(),
            })?;
        self.vault.restore(sealed)
    }
}
