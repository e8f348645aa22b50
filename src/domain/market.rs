//! Market flows: issuance, primary sale, listing and resale.
//!
//! Each flow writes to the ledger only after the chain gateway confirms, with
//! one exception: a listing is reserved before `list_for_sale` so the same
//! units cannot be listed twice while the call is in flight.

use crate::domain::bond::{BondSeries, SeriesTerms};
use crate::domain::chain::ChainReceipt;
use crate::domain::error::BondError;
use crate::domain::ledger::{self, Allocation, Fill, Listing, ListingStatus};
use crate::domain::platform::Platform;
use crate::domain::pricing::{Quote, primary_price};
use crate::domain::units::ensure_positive;
use crate::ports::ledger_port::LedgerPort;

#[derive(Debug, Clone)]
pub struct PrimaryPurchase {
    pub receipt: ChainReceipt,
    pub price_tenths: u64,
    /// `None` if the allocation had already been mirrored from chain events.
    pub allocation: Option<Allocation>,
}

#[derive(Debug, Clone)]
pub struct Resale {
    pub receipt: ChainReceipt,
    pub rejected_offer_ids: Vec<String>,
}

pub fn issue_series(platform: &Platform, terms: SeriesTerms) -> Result<BondSeries, BondError> {
    terms.validate()?;
    let admin = platform.admin_signer()?;
    let receipt = platform.chain.create_series(&admin, &terms)?;
    let series_id = receipt
        .object_id
        .clone()
        .ok_or_else(|| BondError::chain("create_series", "receipt carries no series id"))?;

    if let Some(existing) = platform.ledger.get_series(&series_id)? {
        return Ok(existing);
    }
    let series = terms.into_series(series_id);
    platform.ledger.insert_series(&series)?;
    tracing::info!(
        series_id = %series.id,
        symbol = %series.symbol,
        digest = %receipt.digest,
        "series issued"
    );
    Ok(series)
}

pub fn get_series(platform: &Platform, series_id: &str) -> Result<BondSeries, BondError> {
    series_in(platform.ledger.as_ref(), series_id)
}

fn series_in(store: &dyn LedgerPort, series_id: &str) -> Result<BondSeries, BondError> {
    store
        .get_series(series_id)?
        .ok_or_else(|| BondError::not_found("series", series_id))
}

pub fn quote_primary(platform: &Platform, series_id: &str, amount_tenths: u64) -> Result<Quote, BondError> {
    primary_quote(platform.ledger.as_ref(), series_id, amount_tenths)
}

pub fn quote_listing(platform: &Platform, listing_id: &str) -> Result<Quote, BondError> {
    listing_quote(platform.ledger.as_ref(), listing_id, platform.now_ms())
}

/// Prices newly issued units from the ledger alone, without a chain gateway.
pub fn primary_quote(
    store: &dyn LedgerPort,
    series_id: &str,
    amount_tenths: u64,
) -> Result<Quote, BondError> {
    let series = series_in(store, series_id)?;
    Quote::primary(series.face_value_tenths, ensure_positive(amount_tenths, "amount")?)
}

/// Prices a whole listing at the series rate as of `now_ms`.
pub fn listing_quote(store: &dyn LedgerPort, listing_id: &str, now_ms: i64) -> Result<Quote, BondError> {
    let listing = ledger::get_listing(store, listing_id)?;
    let series = series_in(store, &listing.bond_id)?;
    Quote::secondary(
        series.face_value_tenths,
        series.rate_bps,
        series.start_ms,
        now_ms,
        listing.amount_tenths,
    )
}

/// Buys newly issued units at face value and records the allocation.
pub fn buy_primary(
    platform: &Platform,
    user_id: &str,
    series_id: &str,
    amount_tenths: u64,
) -> Result<PrimaryPurchase, BondError> {
    ensure_positive(amount_tenths, "purchase amount")?;
    let series = get_series(platform, series_id)?;
    if series.is_matured(platform.now_ms()) {
        return Err(BondError::bounds(format!("series {series_id} has matured")));
    }
    series.check_allocation(amount_tenths)?;
    let price = primary_price(series.face_value_tenths, amount_tenths)?;

    let address = platform.address_of(user_id)?;
    let signer = platform.sponsored_signer(&address)?;
    let receipt = platform
        .chain
        .buy_primary(&signer, series_id, amount_tenths, price)?;

    let allocation = ledger::record_allocation(
        platform.ledger.as_ref(),
        series_id,
        &address,
        amount_tenths,
        &receipt.digest,
        platform.now_ms(),
    )?;
    Ok(PrimaryPurchase {
        receipt,
        price_tenths: price,
        allocation,
    })
}

/// Lists units for resale, reserving them off-chain first.
pub fn list_for_sale(
    platform: &Platform,
    user_id: &str,
    series_id: &str,
    amount_tenths: u64,
) -> Result<Listing, BondError> {
    let store = platform.ledger.as_ref();
    let seller = platform.address_of(user_id)?;
    let listing = ledger::create_listing(store, series_id, &seller, amount_tenths, platform.now_ms())?;

    let outcome = platform.sponsored_signer(&seller).and_then(|signer| {
        platform
            .chain
            .list_for_sale(&signer, series_id, amount_tenths)
    });

    let receipt = match outcome {
        Ok(receipt) => receipt,
        Err(e @ BondError::ChainUnknownOutcome { .. }) => {
            tracing::warn!(
                listing_id = %listing.id,
                error = %e,
                "listing outcome unknown; reservation kept until the indexer resolves it"
            );
            return Err(e);
        }
        Err(e) => {
            if let Err(cancel_err) = store.cancel_listing(&listing.id, platform.now_ms()) {
                tracing::error!(listing_id = %listing.id, error = %cancel_err, "failed to release reservation");
            }
            return Err(e);
        }
    };

    if let Some(chain_listing_id) = receipt.object_id.as_deref() {
        store.set_chain_listing_id(&listing.id, chain_listing_id)?;
    }
    ledger::get_listing(store, &listing.id)
}

/// Buys a whole listing at the series rate.
pub fn buy_listing(platform: &Platform, user_id: &str, listing_id: &str) -> Result<Resale, BondError> {
    let store = platform.ledger.as_ref();
    let buyer = platform.address_of(user_id)?;
    let listing = ledger::get_listing(store, listing_id)?;
    if listing.seller == buyer {
        return Err(BondError::Forbidden {
            actor: user_id.to_string(),
            action: "buy their own listing",
        });
    }
    let quote = quote_listing(platform, listing_id)?;
    execute_resale(
        platform,
        &listing,
        None,
        &buyer,
        listing.amount_tenths,
        quote.total_tenths,
    )
}

/// Claims `listing`, pays for it from the buyer's wallet and settles the ledger.
///
/// A failed chain call releases the claim. An unknown outcome keeps it, so the
/// listing cannot be sold again until the indexer or an operator resolves it.
pub(crate) fn execute_resale(
    platform: &Platform,
    listing: &Listing,
    offer_id: Option<&str>,
    buyer: &str,
    units_tenths: u64,
    max_payment_tenths: u64,
) -> Result<Resale, BondError> {
    let store = platform.ledger.as_ref();
    if listing.status != ListingStatus::Open {
        return Err(BondError::conflict(
            "listing",
            &listing.id,
            format!("listing is already {}", listing.status),
        ));
    }
    let chain_listing_id = listing.chain_listing_id.as_deref().ok_or_else(|| {
        BondError::conflict("listing", &listing.id, "listing is not yet confirmed on chain")
    })?;

    let claim_token = ledger::claim_listing(store, &listing.id, offer_id)?;

    let outcome = platform.sponsored_signer(buyer).and_then(|signer| {
        platform.chain.buy_from_listing(
            &signer,
            &listing.bond_id,
            chain_listing_id,
            units_tenths,
            max_payment_tenths,
            platform.now_ms(),
        )
    });

    let receipt = match outcome {
        Ok(receipt) => receipt,
        Err(e @ BondError::ChainUnknownOutcome { .. }) => {
            tracing::warn!(listing_id = %listing.id, error = %e, "resale outcome unknown; claim kept");
            return Err(e);
        }
        Err(e) => {
            if let Err(release_err) = store.release_claim(&listing.id, &claim_token) {
                tracing::error!(listing_id = %listing.id, error = %release_err, "failed to release claim");
            }
            tracing::warn!(listing_id = %listing.id, error = %e, "resale failed; claim released");
            return Err(e);
        }
    };

    let fill = Fill {
        listing,
        offer_id,
        claim_token: &claim_token,
        buyer,
        units_tenths,
    };
    let rejected_offer_ids = ledger::fill_listing(store, &fill, &receipt, platform.now_ms())?;
    Ok(Resale {
        receipt,
        rejected_offer_ids,
    })
}

/// Mints stablecoin to `recipient` with the treasury cap.
pub fn mint_stablecoin(
    platform: &Platform,
    recipient: &str,
    amount_tenths: u64,
) -> Result<ChainReceipt, BondError> {
    ensure_positive(amount_tenths, "mint amount")?;
    let admin = platform.admin_signer()?;
    let receipt = platform.chain.mint(&admin, recipient, amount_tenths)?;
    tracing::info!(recipient, amount_tenths, digest = %receipt.digest, "stablecoin minted");
    Ok(receipt)
}
