//! Contract call definitions for the bond and stablecoin packages.
//!
//! Argument order for every entry function is fixed here and versioned by
//! [`CONTRACT_ABI_VERSION`]; adapters must not reorder or guess.

use serde::{Deserialize, Serialize};

use crate::domain::bond::SeriesTerms;

pub const CONTRACT_ABI_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinType {
    /// Network fee currency.
    Gas,
    /// Platform stablecoin, denominated in tenths.
    Stablecoin,
}

impl CoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinType::Gas => "gas",
            CoinType::Stablecoin => "stablecoin",
        }
    }
}

/// On-chain object ids the entry functions take as arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractObjects {
    pub package_id: String,
    pub registry_id: String,
    pub admin_cap_id: String,
    pub treasury_cap_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArg {
    pub name: String,
    pub value: String,
}

impl CallArg {
    fn new(name: &str, value: impl ToString) -> Self {
        CallArg {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateSeries(SeriesTerms),
    BuyPrimary {
        series_id: String,
        amount_tenths: u64,
        max_payment_tenths: u64,
    },
    ListForSale {
        series_id: String,
        amount_tenths: u64,
    },
    BuyFromListing {
        series_id: String,
        chain_listing_id: String,
        amount_tenths: u64,
        max_payment_tenths: u64,
        now_ms: i64,
    },
    Mint {
        recipient: String,
        amount_tenths: u64,
    },
    TransferGas {
        recipient: String,
        amount: u64,
    },
}

impl ContractCall {
    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::CreateSeries(_) => "create_series",
            ContractCall::BuyPrimary { .. } => "buy_primary",
            ContractCall::ListForSale { .. } => "list_for_sale",
            ContractCall::BuyFromListing { .. } => "buy_from_listing",
            ContractCall::Mint { .. } => "mint",
            ContractCall::TransferGas { .. } => "transfer_gas",
        }
    }

    /// Positional arguments in entry-function order.
    ///
    /// `payment_coins` is the cap on stablecoin the gateway may merge from the
    /// sender's coins to pay; the contract refunds any excess.
    pub fn arguments(&self, objects: &ContractObjects) -> Vec<CallArg> {
        match self {
            ContractCall::CreateSeries(terms) => vec![
                CallArg::new("admin_cap", &objects.admin_cap_id),
                CallArg::new("symbol", &terms.symbol),
                CallArg::new("name", &terms.name),
                CallArg::new("face_value_tenths", terms.face_value_tenths),
                CallArg::new("rate_bps", terms.rate_bps),
                CallArg::new("tenure_days", terms.tenure_days),
                CallArg::new("issuer_address", &terms.issuer_address),
                CallArg::new("start_ms", terms.start_ms),
                CallArg::new("total_supply_tenths", terms.total_supply_tenths),
            ],
            ContractCall::BuyPrimary {
                series_id,
                amount_tenths,
                max_payment_tenths,
            } => vec![
                CallArg::new("series", series_id),
                CallArg::new("payment_coins", max_payment_tenths),
                CallArg::new("amount_tenths", amount_tenths),
                CallArg::new("registry", &objects.registry_id),
            ],
            ContractCall::ListForSale {
                series_id,
                amount_tenths,
            } => vec![
                CallArg::new("series", series_id),
                CallArg::new("amount_tenths", amount_tenths),
                CallArg::new("registry", &objects.registry_id),
            ],
            ContractCall::BuyFromListing {
                series_id,
                chain_listing_id,
                amount_tenths,
                max_payment_tenths,
                now_ms,
            } => vec![
                CallArg::new("series", series_id),
                CallArg::new("listing_id", chain_listing_id),
                CallArg::new("payment_coins", max_payment_tenths),
                CallArg::new("amount_tenths", amount_tenths),
                CallArg::new("now_ms", now_ms),
                CallArg::new("registry", &objects.registry_id),
            ],
            ContractCall::Mint {
                recipient,
                amount_tenths,
            } => vec![
                CallArg::new("admin_cap", &objects.admin_cap_id),
                CallArg::new("treasury_cap", &objects.treasury_cap_id),
                CallArg::new("recipient", recipient),
                CallArg::new("tenths", amount_tenths),
            ],
            ContractCall::TransferGas { recipient, amount } => vec![
                CallArg::new("recipient", recipient),
                CallArg::new("amount", amount),
            ],
        }
    }
}

/// Confirmation of an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub digest: String,
    pub request_id: String,
    /// Object created by the call, e.g. a series or on-chain listing id.
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed(ChainReceipt),
    Failed(String),
    Unknown,
}
