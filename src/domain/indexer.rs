//! Mirrors confirmed contract events into the ledger.
//!
//! Replaying an event is always safe: duplicates are detected by tx digest or
//! chain object id, and events for listings already settled off-chain are
//! skipped. Sales and cancellations confirmed on chain override claims the
//! platform still holds on the listing.

use serde::{Deserialize, Serialize};

use crate::domain::bond::BondSeries;
use crate::domain::error::BondError;
use crate::domain::ledger::{self, Allocation, AllocationSource, Listing, ListingStatus, Settlement};
use crate::ports::chain_port::ChainPort;
use crate::ports::ledger_port::LedgerPort;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    SeriesCreated {
        tx_digest: String,
        series_id: String,
        symbol: String,
        name: String,
        face_value_tenths: u64,
        rate_bps: u32,
        tenure_days: u32,
        issuer_address: String,
        start_ms: i64,
        total_supply_tenths: u64,
    },
    PrimaryPurchased {
        tx_digest: String,
        series_id: String,
        buyer: String,
        amount_tenths: u64,
        timestamp_ms: i64,
    },
    Listed {
        tx_digest: String,
        series_id: String,
        chain_listing_id: String,
        seller: String,
        amount_tenths: u64,
        timestamp_ms: i64,
    },
    ListingSold {
        tx_digest: String,
        chain_listing_id: String,
        buyer: String,
        amount_tenths: u64,
        timestamp_ms: i64,
    },
    ListingCancelled {
        tx_digest: String,
        chain_listing_id: String,
        timestamp_ms: i64,
    },
}

impl ChainEvent {
    pub fn tx_digest(&self) -> &str {
        match self {
            ChainEvent::SeriesCreated { tx_digest, .. }
            | ChainEvent::PrimaryPurchased { tx_digest, .. }
            | ChainEvent::Listed { tx_digest, .. }
            | ChainEvent::ListingSold { tx_digest, .. }
            | ChainEvent::ListingCancelled { tx_digest, .. } => tx_digest,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<ChainEvent>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Recorded,
    Duplicate,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub recorded: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub next_cursor: Option<String>,
}

pub struct Indexer<'a> {
    ledger: &'a dyn LedgerPort,
}

impl<'a> Indexer<'a> {
    pub fn new(ledger: &'a dyn LedgerPort) -> Self {
        Indexer { ledger }
    }

    pub fn apply(&self, event: &ChainEvent) -> Result<Applied, BondError> {
        match event {
            ChainEvent::SeriesCreated {
                series_id,
                symbol,
                name,
                face_value_tenths,
                rate_bps,
                tenure_days,
                issuer_address,
                start_ms,
                total_supply_tenths,
                ..
            } => {
                if self.ledger.get_series(series_id)?.is_some() {
                    return Ok(Applied::Duplicate);
                }
                self.ledger.insert_series(&BondSeries {
                    id: series_id.clone(),
                    symbol: symbol.clone(),
                    name: name.clone(),
                    face_value_tenths: *face_value_tenths,
                    rate_bps: *rate_bps,
                    tenure_days: *tenure_days,
                    issuer_address: issuer_address.clone(),
                    start_ms: *start_ms,
                    total_supply_tenths: *total_supply_tenths,
                    allocated_tenths: 0,
                })?;
                Ok(Applied::Recorded)
            }
            ChainEvent::PrimaryPurchased {
                tx_digest,
                series_id,
                buyer,
                amount_tenths,
                timestamp_ms,
            } => {
                if self.ledger.get_series(series_id)?.is_none() {
                    tracing::warn!(series_id, tx_digest, "purchase for unknown series");
                    return Ok(Applied::Skipped);
                }
                let allocation = Allocation {
                    id: ledger::new_id(),
                    bond_id: series_id.clone(),
                    holder: buyer.clone(),
                    units_tenths: *amount_tenths,
                    source: AllocationSource::Primary,
                    source_tx_hash: tx_digest.clone(),
                    created_at_ms: *timestamp_ms,
                };
                if self.ledger.append_allocation(&allocation)? {
                    Ok(Applied::Recorded)
                } else {
                    Ok(Applied::Duplicate)
                }
            }
            ChainEvent::Listed {
                series_id,
                chain_listing_id,
                seller,
                amount_tenths,
                timestamp_ms,
                ..
            } => self.apply_listed(series_id, chain_listing_id, seller, *amount_tenths, *timestamp_ms),
            ChainEvent::ListingSold {
                tx_digest,
                chain_listing_id,
                buyer,
                amount_tenths,
                timestamp_ms,
            } => self.apply_sold(tx_digest, chain_listing_id, buyer, *amount_tenths, *timestamp_ms),
            ChainEvent::ListingCancelled {
                chain_listing_id,
                timestamp_ms,
                ..
            } => {
                let Some(listing) = self.open_listing(chain_listing_id)? else {
                    return Ok(Applied::Skipped);
                };
                if self
                    .ledger
                    .cancel_listing_from_chain(&listing.id, *timestamp_ms)?
                {
                    Ok(Applied::Recorded)
                } else {
                    Ok(Applied::Skipped)
                }
            }
        }
    }

    /// Pulls one page of events after `cursor` and applies them in order.
    pub fn sync(
        &self,
        chain: &dyn ChainPort,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SyncSummary, BondError> {
        let page = chain.poll_events(cursor, limit)?;
        let mut summary = SyncSummary {
            next_cursor: page.next_cursor.clone(),
            ..SyncSummary::default()
        };
        for event in &page.events {
            match self.apply(event)? {
                Applied::Recorded => summary.recorded += 1,
                Applied::Duplicate => summary.duplicates += 1,
                Applied::Skipped => {
                    tracing::debug!(tx_digest = event.tx_digest(), "event skipped");
                    summary.skipped += 1;
                }
            }
        }
        tracing::info!(
            recorded = summary.recorded,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "chain events indexed"
        );
        Ok(summary)
    }

    fn apply_listed(
        &self,
        series_id: &str,
        chain_listing_id: &str,
        seller: &str,
        amount_tenths: u64,
        timestamp_ms: i64,
    ) -> Result<Applied, BondError> {
        if self.ledger.find_listing_by_chain_id(chain_listing_id)?.is_some() {
            return Ok(Applied::Duplicate);
        }

        // A reservation whose list_for_sale outcome was never confirmed.
        let reserved = self
            .ledger
            .list_listings(Some(series_id))?
            .into_iter()
            .find(|l| {
                l.status == ListingStatus::Open
                    && l.chain_listing_id.is_none()
                    && l.seller == seller
                    && l.amount_tenths == amount_tenths
            });
        if let Some(listing) = reserved {
            self.ledger.set_chain_listing_id(&listing.id, chain_listing_id)?;
            return Ok(Applied::Recorded);
        }

        let listing = Listing {
            id: ledger::new_id(),
            bond_id: series_id.to_string(),
            seller: seller.to_string(),
            amount_tenths,
            sold_tenths: 0,
            status: ListingStatus::Open,
            chain_listing_id: Some(chain_listing_id.to_string()),
            created_at_ms: timestamp_ms,
        };
        match self.ledger.insert_listing_checked(&listing) {
            Ok(()) => Ok(Applied::Recorded),
            Err(BondError::Bounds { reason } | BondError::NotFound { id: reason, .. }) => {
                tracing::warn!(chain_listing_id, seller, %reason, "listing does not match ledger holdings");
                Ok(Applied::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_sold(
        &self,
        tx_digest: &str,
        chain_listing_id: &str,
        buyer: &str,
        amount_tenths: u64,
        timestamp_ms: i64,
    ) -> Result<Applied, BondError> {
        let Some(listing) = self.open_listing(chain_listing_id)? else {
            return Ok(Applied::Skipped);
        };
        // The sale is final on chain, so it wins over any claim the platform
        // still holds, including one stranded by an unknown outcome.
        let token = ledger::new_id();
        let Some(taken) = self.ledger.take_over_claim(&listing.id, &token)? else {
            return Ok(Applied::Skipped);
        };
        if taken.offer_id.is_some() {
            tracing::info!(listing_id = %listing.id, tx_digest, "resolving stranded settlement claim");
        }
        let settlement = Settlement {
            listing_id: listing.id.clone(),
            offer_id: taken.offer_id,
            claim_token: token,
            bond_id: listing.bond_id.clone(),
            buyer: buyer.to_string(),
            units_tenths: amount_tenths.min(listing.amount_tenths),
            allocation_id: ledger::new_id(),
            tx_hash: tx_digest.to_string(),
            settled_at_ms: timestamp_ms,
        };
        self.ledger.settle_listing(&settlement)?;
        Ok(Applied::Recorded)
    }

    fn open_listing(&self, chain_listing_id: &str) -> Result<Option<Listing>, BondError> {
        Ok(self
            .ledger
            .find_listing_by_chain_id(chain_listing_id)?
            .filter(|l| l.status == ListingStatus::Open))
    }
}
