//! Price negotiation on resale listings.
//!
//! Offers move `pending -> accepted | rejected | cancelled` exactly once.
//! Only acceptance touches the chain; it settles through the same claim
//! protocol as a direct listing purchase.

use std::fmt;
use std::str::FromStr;

use crate::domain::chain::ChainReceipt;
use crate::domain::error::BondError;
use crate::domain::ledger::{self, ListingStatus};
use crate::domain::market;
use crate::domain::platform::Platform;
use crate::domain::pricing::secondary_price;
use crate::domain::units::ensure_positive;

/// Largest allowed distance between a proposed rate and the series rate.
pub const MAX_RATE_DELTA_BPS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = BondError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OfferStatus::Pending),
            "accepted" => Ok(OfferStatus::Accepted),
            "rejected" => Ok(OfferStatus::Rejected),
            "cancelled" => Ok(OfferStatus::Cancelled),
            other => Err(BondError::DatabaseQuery {
                reason: format!("unknown offer status {other:?}"),
            }),
        }
    }
}

/// A buyer's proposal to take a listing at a different rate.
///
/// `buyer` and `seller` are wallet addresses; `original_rate_bps` is the
/// series rate at the moment the offer was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOffer {
    pub id: String,
    pub bond_id: String,
    pub listing_id: String,
    pub buyer: String,
    pub seller: String,
    pub units_tenths: u64,
    pub original_rate_bps: u32,
    pub proposed_rate_bps: u32,
    pub proposed_total_amount_tenths: u64,
    pub status: OfferStatus,
    pub note: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    pub listing_id: String,
    pub units_tenths: u64,
    pub proposed_rate_bps: u32,
    pub note: Option<String>,
}

/// Outcome of a successful acceptance.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub offer: NegotiationOffer,
    pub receipt: ChainReceipt,
    pub rejected_offer_ids: Vec<String>,
}

pub fn check_rate_bounds(original_rate_bps: u32, proposed_rate_bps: u32) -> Result<(), BondError> {
    let delta = original_rate_bps.abs_diff(proposed_rate_bps);
    if delta > MAX_RATE_DELTA_BPS {
        return Err(BondError::bounds(format!(
            "proposed rate {proposed_rate_bps} bps is {delta} bps from series rate \
             {original_rate_bps} bps (max {MAX_RATE_DELTA_BPS})"
        )));
    }
    Ok(())
}

/// Opens a pending offer from `buyer_user` on an open listing.
pub fn create_offer(
    platform: &Platform,
    buyer_user: &str,
    request: &OfferRequest,
) -> Result<NegotiationOffer, BondError> {
    ensure_positive(request.units_tenths, "offer units")?;
    let store = platform.ledger.as_ref();
    let buyer = platform.address_of(buyer_user)?;

    let listing = ledger::get_listing(store, &request.listing_id)?;
    if listing.status != ListingStatus::Open {
        return Err(BondError::conflict(
            "listing",
            &listing.id,
            format!("cannot negotiate on a {} listing", listing.status),
        ));
    }
    if listing.seller == buyer {
        return Err(BondError::Forbidden {
            actor: buyer_user.to_string(),
            action: "negotiate on their own listing",
        });
    }
    if request.units_tenths > listing.amount_tenths {
        return Err(BondError::bounds(format!(
            "offer for {} tenths exceeds listing amount {}",
            request.units_tenths, listing.amount_tenths
        )));
    }

    let series = store
        .get_series(&listing.bond_id)?
        .ok_or_else(|| BondError::not_found("series", &listing.bond_id))?;
    check_rate_bounds(series.rate_bps, request.proposed_rate_bps)?;

    let now = platform.now_ms();
    let total = secondary_price(
        series.face_value_tenths,
        request.proposed_rate_bps,
        series.start_ms,
        now,
        request.units_tenths,
    )?;

    let offer = NegotiationOffer {
        id: ledger::new_id(),
        bond_id: listing.bond_id.clone(),
        listing_id: listing.id.clone(),
        buyer,
        seller: listing.seller.clone(),
        units_tenths: request.units_tenths,
        original_rate_bps: series.rate_bps,
        proposed_rate_bps: request.proposed_rate_bps,
        proposed_total_amount_tenths: total,
        status: OfferStatus::Pending,
        note: request
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        created_at_ms: now,
        updated_at_ms: now,
    };
    store.insert_offer(&offer)?;
    tracing::info!(
        offer_id = %offer.id,
        listing_id = %offer.listing_id,
        units_tenths = offer.units_tenths,
        proposed_rate_bps = offer.proposed_rate_bps,
        total_tenths = total,
        "offer created"
    );
    Ok(offer)
}

pub fn get_offer(platform: &Platform, offer_id: &str) -> Result<NegotiationOffer, BondError> {
    platform
        .ledger
        .get_offer(offer_id)?
        .ok_or_else(|| BondError::not_found("offer", offer_id))
}

/// Seller accepts: the buyer's wallet pays the negotiated total on chain and
/// the ledger settles the sale.
pub fn accept_offer(
    platform: &Platform,
    offer_id: &str,
    acting_user: &str,
) -> Result<Acceptance, BondError> {
    let offer = pending_offer(platform, offer_id)?;
    let actor = platform.address_of(acting_user)?;
    if actor != offer.seller {
        return Err(BondError::Forbidden {
            actor: acting_user.to_string(),
            action: "accept an offer on another seller's listing",
        });
    }

    let listing = ledger::get_listing(platform.ledger.as_ref(), &offer.listing_id)?;
    let resale = market::execute_resale(
        platform,
        &listing,
        Some(&offer.id),
        &offer.buyer,
        offer.units_tenths,
        offer.proposed_total_amount_tenths,
    )?;

    Ok(Acceptance {
        offer: get_offer(platform, offer_id)?,
        receipt: resale.receipt,
        rejected_offer_ids: resale.rejected_offer_ids,
    })
}

/// Either counterparty may reject a pending offer.
pub fn reject_offer(
    platform: &Platform,
    offer_id: &str,
    acting_user: &str,
) -> Result<NegotiationOffer, BondError> {
    let offer = pending_offer(platform, offer_id)?;
    let actor = platform.address_of(acting_user)?;
    if actor != offer.seller && actor != offer.buyer {
        return Err(BondError::Forbidden {
            actor: acting_user.to_string(),
            action: "reject an offer they are not party to",
        });
    }
    close(platform, &offer, OfferStatus::Rejected)
}

/// Only the buyer who made the offer may cancel it.
pub fn cancel_offer(
    platform: &Platform,
    offer_id: &str,
    acting_user: &str,
) -> Result<NegotiationOffer, BondError> {
    let offer = pending_offer(platform, offer_id)?;
    let actor = platform.address_of(acting_user)?;
    if actor != offer.buyer {
        return Err(BondError::Forbidden {
            actor: acting_user.to_string(),
            action: "cancel another buyer's offer",
        });
    }
    close(platform, &offer, OfferStatus::Cancelled)
}

fn pending_offer(platform: &Platform, offer_id: &str) -> Result<NegotiationOffer, BondError> {
    let offer = get_offer(platform, offer_id)?;
    if offer.status.is_terminal() {
        return Err(BondError::conflict(
            "offer",
            offer_id,
            format!("offer is already {}", offer.status),
        ));
    }
    Ok(offer)
}

fn close(
    platform: &Platform,
    offer: &NegotiationOffer,
    to: OfferStatus,
) -> Result<NegotiationOffer, BondError> {
    if !platform.ledger.close_offer(&offer.id, to, platform.now_ms())? {
        return Err(BondError::conflict(
            "offer",
            &offer.id,
            "offer is no longer pending or is being settled",
        ));
    }
    tracing::info!(offer_id = %offer.id, status = %to, "offer closed");
    get_offer(platform, &offer.id)
}
