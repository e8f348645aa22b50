//! Off-chain ledger storage port.
//!
//! Every method that changes a status is a single compare-and-swap against
//! the backing store: implementations must make the check and the write one
//! atomic step, so concurrent callers cannot both observe `open`/`pending`.

use crate::domain::bond::BondSeries;
use crate::domain::error::BondError;
use crate::domain::ledger::{Allocation, Holdings, Listing, Settlement, TakenClaim};
use crate::domain::negotiation::{NegotiationOffer, OfferStatus};

pub trait LedgerPort: Send + Sync {
    fn insert_series(&self, series: &BondSeries) -> Result<(), BondError>;

    fn get_series(&self, id: &str) -> Result<Option<BondSeries>, BondError>;

    fn list_series(&self) -> Result<Vec<BondSeries>, BondError>;

    /// Appends an allocation; returns `false` if its tx hash is already recorded.
    ///
    /// Primary allocations also raise the series' `allocated_tenths` in the same
    /// transaction and fail with `Bounds` if that would exceed total supply.
    fn append_allocation(&self, allocation: &Allocation) -> Result<bool, BondError>;

    fn list_allocations(&self, bond_id: Option<&str>) -> Result<Vec<Allocation>, BondError>;

    fn holdings(&self, bond_id: &str, holder: &str) -> Result<Holdings, BondError>;

    /// Inserts an open listing if the seller's unlisted balance covers it,
    /// failing with `Bounds` otherwise. Check and insert are one transaction.
    fn insert_listing_checked(&self, listing: &Listing) -> Result<(), BondError>;

    fn get_listing(&self, id: &str) -> Result<Option<Listing>, BondError>;

    fn find_listing_by_chain_id(&self, chain_listing_id: &str)
    -> Result<Option<Listing>, BondError>;

    fn list_listings(&self, bond_id: Option<&str>) -> Result<Vec<Listing>, BondError>;

    fn set_chain_listing_id(&self, id: &str, chain_listing_id: &str) -> Result<(), BondError>;

    /// Claims an open, unclaimed listing (and, if given, its pending offer) for
    /// settlement. Returns `false` if either is no longer claimable.
    fn claim_listing(
        &self,
        listing_id: &str,
        offer_id: Option<&str>,
        token: &str,
    ) -> Result<bool, BondError>;

    /// Drops a claim taken with `token`; a no-op if the claim is gone.
    fn release_claim(&self, listing_id: &str, token: &str) -> Result<(), BondError>;

    /// Moves whatever claim an open listing carries (none, or one left behind
    /// by a submission with an unknown outcome) to `token`, together with the
    /// offer claimed alongside it. Returns `None` if the listing is not open.
    ///
    /// Only a confirmed chain event may take a claim over.
    fn take_over_claim(&self, listing_id: &str, token: &str)
    -> Result<Option<TakenClaim>, BondError>;

    /// Completes a claimed sale: the listing becomes `filled`, the offer (if
    /// any) `accepted`, the buyer receives a resale allocation, and every other
    /// pending offer on the listing is rejected. Returns the rejected offer ids,
    /// or `ConcurrencyConflict` if the claim is no longer held.
    fn settle_listing(&self, settlement: &Settlement) -> Result<Vec<String>, BondError>;

    /// `open` and unclaimed -> `cancelled`, rejecting the listing's pending
    /// offers in the same transaction. Returns `false` if the listing was not
    /// in that state.
    fn cancel_listing(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError>;

    /// `open` -> `cancelled` whether or not the listing is claimed, dropping
    /// any claims and rejecting pending offers. Used when the chain has
    /// already cancelled the listing. Returns `false` if it was not open.
    fn cancel_listing_from_chain(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError>;

    fn insert_offer(&self, offer: &NegotiationOffer) -> Result<(), BondError>;

    fn get_offer(&self, id: &str) -> Result<Option<NegotiationOffer>, BondError>;

    fn list_offers(&self, listing_id: Option<&str>) -> Result<Vec<NegotiationOffer>, BondError>;

    /// `pending` and unclaimed -> `to`. Returns `false` if the offer was not in that state.
    fn close_offer(&self, id: &str, to: OfferStatus, updated_at_ms: i64)
    -> Result<bool, BondError>;
}
