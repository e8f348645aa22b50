//! Allocation and listing ledger.
//!
//! Off-chain bookkeeping of holdings and resale listings. Allocations are
//! append-only; listings move `open -> filled | cancelled` exactly once.

use std::fmt;
use std::str::FromStr;

use crate::domain::chain::ChainReceipt;
use crate::domain::error::BondError;
use crate::domain::units::ensure_positive;
use crate::ports::ledger_port::LedgerPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    Primary,
    Resale,
}

impl AllocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationSource::Primary => "primary",
            AllocationSource::Resale => "resale",
        }
    }
}

impl FromStr for AllocationSource {
    type Err = BondError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(AllocationSource::Primary),
            "resale" => Ok(AllocationSource::Resale),
            other => Err(BondError::DatabaseQuery {
                reason: format!("unknown allocation source {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: String,
    pub bond_id: String,
    pub holder: String,
    pub units_tenths: u64,
    pub source: AllocationSource,
    pub source_tx_hash: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Open,
    Filled,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Open => "open",
            ListingStatus::Filled => "filled",
            ListingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListingStatus::Open)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = BondError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ListingStatus::Open),
            "filled" => Ok(ListingStatus::Filled),
            "cancelled" => Ok(ListingStatus::Cancelled),
            other => Err(BondError::DatabaseQuery {
                reason: format!("unknown listing status {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub id: String,
    pub bond_id: String,
    pub seller: String,
    pub amount_tenths: u64,
    pub sold_tenths: u64,
    pub status: ListingStatus,
    pub chain_listing_id: Option<String>,
    pub created_at_ms: i64,
}

/// A holder's position in one bond.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Holdings {
    /// Sum of all allocations received.
    pub allocated_tenths: u64,
    /// Sum of units sold through filled listings.
    pub sold_tenths: u64,
    /// Sum of open listing amounts.
    pub listed_tenths: u64,
}

impl Holdings {
    pub fn held_tenths(&self) -> u64 {
        self.allocated_tenths.saturating_sub(self.sold_tenths)
    }

    pub fn unlisted_tenths(&self) -> u64 {
        self.held_tenths().saturating_sub(self.listed_tenths)
    }
}

/// A confirmed resale, ready to be written to the ledger under a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub listing_id: String,
    pub offer_id: Option<String>,
    pub claim_token: String,
    pub bond_id: String,
    pub buyer: String,
    pub units_tenths: u64,
    pub allocation_id: String,
    pub tx_hash: String,
    pub settled_at_ms: i64,
}

/// A listing claim moved to a new token by [`LedgerPort::take_over_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakenClaim {
    /// Offer the previous holder claimed with the listing.
    pub offer_id: Option<String>,
}

impl Settlement {
    pub fn resale_allocation(&self) -> Allocation {
        Allocation {
            id: self.allocation_id.clone(),
            bond_id: self.bond_id.clone(),
            holder: self.buyer.clone(),
            units_tenths: self.units_tenths,
            source: AllocationSource::Resale,
            source_tx_hash: self.tx_hash.clone(),
            created_at_ms: self.settled_at_ms,
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Records a confirmed primary purchase. Returns `None` if `tx_hash` was already recorded.
pub fn record_allocation(
    store: &dyn LedgerPort,
    bond_id: &str,
    holder: &str,
    units_tenths: u64,
    tx_hash: &str,
    now_ms: i64,
) -> Result<Option<Allocation>, BondError> {
    ensure_positive(units_tenths, "allocation units")?;
    if tx_hash.trim().is_empty() {
        return Err(BondError::validation("allocation requires a confirmed tx hash"));
    }
    let series = store
        .get_series(bond_id)?
        .ok_or_else(|| BondError::not_found("series", bond_id))?;
    series.check_allocation(units_tenths)?;

    let allocation = Allocation {
        id: new_id(),
        bond_id: bond_id.to_string(),
        holder: holder.to_string(),
        units_tenths,
        source: AllocationSource::Primary,
        source_tx_hash: tx_hash.to_string(),
        created_at_ms: now_ms,
    };

    if !store.append_allocation(&allocation)? {
        tracing::debug!(tx_hash, "allocation already recorded");
        return Ok(None);
    }
    tracing::info!(bond_id, holder, units_tenths, tx_hash, "allocation recorded");
    Ok(Some(allocation))
}

pub fn holdings(store: &dyn LedgerPort, bond_id: &str, holder: &str) -> Result<Holdings, BondError> {
    store.holdings(bond_id, holder)
}

/// Units the holder may still list: held minus open listings.
pub fn unlisted_balance(store: &dyn LedgerPort, bond_id: &str, holder: &str) -> Result<u64, BondError> {
    Ok(store.holdings(bond_id, holder)?.unlisted_tenths())
}

pub fn listings_for_bond(store: &dyn LedgerPort, bond_id: &str) -> Result<Vec<Listing>, BondError> {
    store.list_listings(Some(bond_id))
}

/// Opens a listing if the seller's unlisted balance covers `amount_tenths`.
pub fn create_listing(
    store: &dyn LedgerPort,
    bond_id: &str,
    seller: &str,
    amount_tenths: u64,
    now_ms: i64,
) -> Result<Listing, BondError> {
    ensure_positive(amount_tenths, "listing amount")?;
    if store.get_series(bond_id)?.is_none() {
        return Err(BondError::not_found("series", bond_id));
    }

    let listing = Listing {
        id: new_id(),
        bond_id: bond_id.to_string(),
        seller: seller.to_string(),
        amount_tenths,
        sold_tenths: 0,
        status: ListingStatus::Open,
        chain_listing_id: None,
        created_at_ms: now_ms,
    };
    store.insert_listing_checked(&listing)?;
    tracing::info!(listing_id = %listing.id, bond_id, seller, amount_tenths, "listing opened");
    Ok(listing)
}

pub fn get_listing(store: &dyn LedgerPort, listing_id: &str) -> Result<Listing, BondError> {
    store
        .get_listing(listing_id)?
        .ok_or_else(|| BondError::not_found("listing", listing_id))
}

/// Claims an open listing for settlement, or fails with `ConcurrencyConflict`.
pub fn claim_listing(
    store: &dyn LedgerPort,
    listing_id: &str,
    offer_id: Option<&str>,
) -> Result<String, BondError> {
    let token = new_id();
    if !store.claim_listing(listing_id, offer_id, &token)? {
        return Err(BondError::conflict(
            "listing",
            listing_id,
            "listing is no longer open or is being settled",
        ));
    }
    Ok(token)
}

/// The parties to a claimed sale, before the chain has confirmed it.
#[derive(Debug, Clone)]
pub struct Fill<'a> {
    pub listing: &'a Listing,
    pub offer_id: Option<&'a str>,
    pub claim_token: &'a str,
    pub buyer: &'a str,
    pub units_tenths: u64,
}

/// Marks a claimed listing filled. The receipt is the confirmed purchase.
pub fn fill_listing(
    store: &dyn LedgerPort,
    fill: &Fill<'_>,
    receipt: &ChainReceipt,
    now_ms: i64,
) -> Result<Vec<String>, BondError> {
    let listing = fill.listing;
    ensure_positive(fill.units_tenths, "filled units")?;
    if fill.units_tenths > listing.amount_tenths {
        return Err(BondError::bounds(format!(
            "cannot fill {} tenths from listing {} of {}",
            fill.units_tenths, listing.id, listing.amount_tenths
        )));
    }
    let settlement = Settlement {
        listing_id: listing.id.clone(),
        offer_id: fill.offer_id.map(str::to_string),
        claim_token: fill.claim_token.to_string(),
        bond_id: listing.bond_id.clone(),
        buyer: fill.buyer.to_string(),
        units_tenths: fill.units_tenths,
        allocation_id: new_id(),
        tx_hash: receipt.digest.clone(),
        settled_at_ms: now_ms,
    };
    let rejected = match store.settle_listing(&settlement) {
        Ok(rejected) => rejected,
        Err(BondError::ConcurrencyConflict { .. })
            if recorded_by_indexer(store, &listing.bond_id, &receipt.digest)? =>
        {
            tracing::info!(
                listing_id = %listing.id,
                digest = %receipt.digest,
                "sale already recorded from chain events"
            );
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    tracing::info!(
        listing_id = %listing.id,
        buyer = fill.buyer,
        units_tenths = fill.units_tenths,
        digest = %receipt.digest,
        rejected_offers = rejected.len(),
        "listing filled"
    );
    Ok(rejected)
}

fn recorded_by_indexer(store: &dyn LedgerPort, bond_id: &str, digest: &str) -> Result<bool, BondError> {
    Ok(store
        .list_allocations(Some(bond_id))?
        .iter()
        .any(|a| a.source == AllocationSource::Resale && a.source_tx_hash == digest))
}

/// Cancels an open listing on behalf of its seller.
pub fn cancel_listing(
    store: &dyn LedgerPort,
    listing_id: &str,
    seller: &str,
    now_ms: i64,
) -> Result<Listing, BondError> {
    let listing = get_listing(store, listing_id)?;
    if listing.seller != seller {
        return Err(BondError::Forbidden {
            actor: seller.to_string(),
            action: "cancel another seller's listing",
        });
    }
    if listing.status.is_terminal() {
        return Err(BondError::conflict(
            "listing",
            listing_id,
            format!("listing is already {}", listing.status),
        ));
    }
    if !store.cancel_listing(listing_id, now_ms)? {
        return Err(BondError::conflict(
            "listing",
            listing_id,
            "listing changed state during cancellation",
        ));
    }
    tracing::info!(listing_id, seller, "listing cancelled");
    get_listing(store, listing_id)
}
