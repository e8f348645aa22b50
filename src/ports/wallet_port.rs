//! Custodial wallet storage port.

use crate::domain::error::BondError;
use crate::domain::vault::CustodialWallet;

pub trait WalletPort: Send + Sync {
    /// Inserts the wallet unless the user already has one; returns whether it was inserted.
    fn insert_wallet(&self, wallet: &CustodialWallet) -> Result<bool, BondError>;

    fn find_wallet_by_user(&self, user_id: &str) -> Result<Option<CustodialWallet>, BondError>;

    fn find_wallet_by_address(&self, address: &str)
    -> Result<Option<CustodialWallet>, BondError>;
}
