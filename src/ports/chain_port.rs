//! Chain gateway port.
//!
//! Every call blocks until the gateway returns a confirmed digest or an
//! error. Implementations resolve timeouts by querying `transaction_status`
//! for the call's request id and never re-submit blindly.

use crate::domain::bond::SeriesTerms;
use crate::domain::chain::{ChainReceipt, CoinType, ContractCall, TxStatus};
use crate::domain::error::BondError;
use crate::domain::indexer::EventPage;
use crate::domain::vault::CustodialSigner;

pub trait ChainPort: Send + Sync {
    fn submit(&self, signer: &CustodialSigner, call: &ContractCall)
    -> Result<ChainReceipt, BondError>;

    fn get_balance(&self, address: &str, coin: CoinType) -> Result<u64, BondError>;

    fn transaction_status(&self, request_id: &str) -> Result<TxStatus, BondError>;

    /// Confirmed contract events after `cursor`, oldest first.
    fn poll_events(&self, cursor: Option<&str>, limit: usize) -> Result<EventPage, BondError>;

    /// The receipt's object id is the new series id.
    fn create_series(
        &self,
        admin: &CustodialSigner,
        terms: &SeriesTerms,
    ) -> Result<ChainReceipt, BondError> {
        let call = ContractCall::CreateSeries(terms.clone());
        let receipt = self.submit(admin, &call)?;
        require_object(call.method(), receipt)
    }

    fn buy_primary(
        &self,
        buyer: &CustodialSigner,
        series_id: &str,
        amount_tenths: u64,
        max_payment_tenths: u64,
    ) -> Result<ChainReceipt, BondError> {
        self.submit(
            buyer,
            &ContractCall::BuyPrimary {
                series_id: series_id.to_string(),
                amount_tenths,
                max_payment_tenths,
            },
        )
    }

    /// Returns the on-chain listing id as the receipt's object id.
    fn list_for_sale(
        &self,
        seller: &CustodialSigner,
        series_id: &str,
        amount_tenths: u64,
    ) -> Result<ChainReceipt, BondError> {
        let call = ContractCall::ListForSale {
            series_id: series_id.to_string(),
            amount_tenths,
        };
        let receipt = self.submit(seller, &call)?;
        require_object(call.method(), receipt)
    }

    fn buy_from_listing(
        &self,
        buyer: &CustodialSigner,
        series_id: &str,
        chain_listing_id: &str,
        amount_tenths: u64,
        max_payment_tenths: u64,
        now_ms: i64,
    ) -> Result<ChainReceipt, BondError> {
        self.submit(
            buyer,
            &ContractCall::BuyFromListing {
                series_id: series_id.to_string(),
                chain_listing_id: chain_listing_id.to_string(),
                amount_tenths,
                max_payment_tenths,
                now_ms,
            },
        )
    }

    fn mint(
        &self,
        admin: &CustodialSigner,
        recipient: &str,
        amount_tenths: u64,
    ) -> Result<ChainReceipt, BondError> {
        self.submit(
            admin,
            &ContractCall::Mint {
                recipient: recipient.to_string(),
                amount_tenths,
            },
        )
    }

    fn transfer_gas(
        &self,
        from: &CustodialSigner,
        recipient: &str,
        amount: u64,
    ) -> Result<ChainReceipt, BondError> {
        self.submit(
            from,
            &ContractCall::TransferGas {
                recipient: recipient.to_string(),
                amount,
            },
        )
    }
}

fn require_object(method: &str, receipt: ChainReceipt) -> Result<ChainReceipt, BondError> {
    if receipt.object_id.is_none() {
        return Err(BondError::chain(
            method,
            format!("receipt {} carries no object id", receipt.digest),
        ));
    }
    Ok(receipt)
}
