//! In-process ledger and wallet store.
//!
//! One mutex guards all tables, so every port method is trivially atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::bond::BondSeries;
use crate::domain::error::BondError;
use crate::domain::ledger::{
    Allocation, AllocationSource, Holdings, Listing, ListingStatus, Settlement, TakenClaim,
};
use crate::domain::negotiation::{NegotiationOffer, OfferStatus};
use crate::domain::vault::CustodialWallet;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::wallet_port::WalletPort;

#[derive(Default)]
struct Tables {
    series: Vec<BondSeries>,
    allocations: Vec<Allocation>,
    listings: Vec<Listing>,
    listing_claims: HashMap<String, String>,
    offers: Vec<NegotiationOffer>,
    offer_claims: HashMap<String, String>,
    wallets: Vec<CustodialWallet>,
}

impl Tables {
    fn holdings(&self, bond_id: &str, holder: &str) -> Holdings {
        let allocated_tenths = self
            .allocations
            .iter()
            .filter(|a| a.bond_id == bond_id && a.holder == holder)
            .map(|a| a.units_tenths)
            .sum();
        let mut h = Holdings {
            allocated_tenths,
            ..Holdings::default()
        };
        for l in self
            .listings
            .iter()
            .filter(|l| l.bond_id == bond_id && l.seller == holder)
        {
            match l.status {
                ListingStatus::Filled => h.sold_tenths += l.sold_tenths,
                ListingStatus::Open => h.listed_tenths += l.amount_tenths,
                ListingStatus::Cancelled => {}
            }
        }
        h
    }

    fn listing_mut(&mut self, id: &str) -> Option<&mut Listing> {
        self.listings.iter_mut().find(|l| l.id == id)
    }

    fn offer_mut(&mut self, id: &str) -> Option<&mut NegotiationOffer> {
        self.offers.iter_mut().find(|o| o.id == id)
    }

    fn reject_pending(&mut self, listing_id: &str, now_ms: i64) -> Vec<String> {
        let mut rejected = Vec::new();
        for o in self
            .offers
            .iter_mut()
            .filter(|o| o.listing_id == listing_id && o.status == OfferStatus::Pending)
        {
            o.status = OfferStatus::Rejected;
            o.updated_at_ms = now_ms;
            rejected.push(o.id.clone());
        }
        for id in &rejected {
            self.offer_claims.remove(id);
        }
        rejected
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerPort for MemoryStore {
    fn insert_series(&self, series: &BondSeries) -> Result<(), BondError> {
        let mut t = self.lock();
        if t.series.iter().any(|s| s.id == series.id) {
            return Err(BondError::DatabaseQuery {
                reason: format!("series {} already exists", series.id),
            });
        }
        t.series.push(series.clone());
        Ok(())
    }

    fn get_series(&self, id: &str) -> Result<Option<BondSeries>, BondError> {
        Ok(self.lock().series.iter().find(|s| s.id == id).cloned())
    }

    fn list_series(&self) -> Result<Vec<BondSeries>, BondError> {
        Ok(self.lock().series.clone())
    }

    fn append_allocation(&self, allocation: &Allocation) -> Result<bool, BondError> {
        let mut t = self.lock();
        if t
            .allocations
            .iter()
            .any(|a| a.source_tx_hash == allocation.source_tx_hash)
        {
            return Ok(false);
        }
        if allocation.source == AllocationSource::Primary {
            let series = t
                .series
                .iter_mut()
                .find(|s| s.id == allocation.bond_id)
                .ok_or_else(|| BondError::not_found("series", &allocation.bond_id))?;
            series.check_allocation(allocation.units_tenths)?;
            series.allocated_tenths += allocation.units_tenths;
        }
        t.allocations.push(allocation.clone());
        Ok(true)
    }

    fn list_allocations(&self, bond_id: Option<&str>) -> Result<Vec<Allocation>, BondError> {
        Ok(self
            .lock()
            .allocations
            .iter()
            .filter(|a| bond_id.is_none_or(|b| a.bond_id == b))
            .cloned()
            .collect())
    }

    fn holdings(&self, bond_id: &str, holder: &str) -> Result<Holdings, BondError> {
        Ok(self.lock().holdings(bond_id, holder))
    }

    fn insert_listing_checked(&self, listing: &Listing) -> Result<(), BondError> {
        let mut t = self.lock();
        let available = t.holdings(&listing.bond_id, &listing.seller).unlisted_tenths();
        if listing.amount_tenths > available {
            return Err(BondError::bounds(format!(
                "{} has {available} unlisted tenths, cannot list {}",
                listing.seller, listing.amount_tenths
            )));
        }
        t.listings.push(listing.clone());
        Ok(())
    }

    fn get_listing(&self, id: &str) -> Result<Option<Listing>, BondError> {
        Ok(self.lock().listings.iter().find(|l| l.id == id).cloned())
    }

    fn find_listing_by_chain_id(
        &self,
        chain_listing_id: &str,
    ) -> Result<Option<Listing>, BondError> {
        Ok(self
            .lock()
            .listings
            .iter()
            .find(|l| l.chain_listing_id.as_deref() == Some(chain_listing_id))
            .cloned())
    }

    fn list_listings(&self, bond_id: Option<&str>) -> Result<Vec<Listing>, BondError> {
        Ok(self
            .lock()
            .listings
            .iter()
            .filter(|l| bond_id.is_none_or(|b| l.bond_id == b))
            .cloned()
            .collect())
    }

    fn set_chain_listing_id(&self, id: &str, chain_listing_id: &str) -> Result<(), BondError> {
        let mut t = self.lock();
        let listing = t
            .listing_mut(id)
            .ok_or_else(|| BondError::not_found("listing", id))?;
        listing.chain_listing_id = Some(chain_listing_id.to_string());
        Ok(())
    }

    fn claim_listing(
        &self,
        listing_id: &str,
        offer_id: Option<&str>,
        token: &str,
    ) -> Result<bool, BondError> {
        let mut t = self.lock();
        let listing_open = t
            .listings
            .iter()
            .any(|l| l.id == listing_id && l.status == ListingStatus::Open);
        if !listing_open || t.listing_claims.contains_key(listing_id) {
            return Ok(false);
        }
        if let Some(offer_id) = offer_id {
            let offer_pending = t.offers.iter().any(|o| {
                o.id == offer_id && o.listing_id == listing_id && o.status == OfferStatus::Pending
            });
            if !offer_pending || t.offer_claims.contains_key(offer_id) {
                return Ok(false);
            }
            t.offer_claims
                .insert(offer_id.to_string(), token.to_string());
        }
        t.listing_claims
            .insert(listing_id.to_string(), token.to_string());
        Ok(true)
    }

    fn release_claim(&self, listing_id: &str, token: &str) -> Result<(), BondError> {
        let mut t = self.lock();
        if t.listing_claims.get(listing_id).map(String::as_str) == Some(token) {
            t.listing_claims.remove(listing_id);
        }
        t.offer_claims.retain(|_, held| held != token);
        Ok(())
    }

    fn take_over_claim(
        &self,
        listing_id: &str,
        token: &str,
    ) -> Result<Option<TakenClaim>, BondError> {
        let mut t = self.lock();
        let open = t
            .listings
            .iter()
            .any(|l| l.id == listing_id && l.status == ListingStatus::Open);
        if !open {
            return Ok(None);
        }
        let previous = t
            .listing_claims
            .insert(listing_id.to_string(), token.to_string());
        let mut offer_id = None;
        if let Some(previous) = previous {
            for (id, held) in t.offer_claims.iter_mut() {
                if *held == previous {
                    *held = token.to_string();
                    offer_id = Some(id.clone());
                }
            }
        }
        Ok(Some(TakenClaim { offer_id }))
    }

    fn settle_listing(&self, s: &Settlement) -> Result<Vec<String>, BondError> {
        let mut t = self.lock();
        if t.listing_claims.get(&s.listing_id) != Some(&s.claim_token) {
            return Err(BondError::conflict(
                "listing",
                &s.listing_id,
                "settlement claim is no longer held",
            ));
        }
        if let Some(offer_id) = &s.offer_id {
            if t.offer_claims.get(offer_id) != Some(&s.claim_token) {
                return Err(BondError::conflict(
                    "offer",
                    offer_id,
                    "settlement claim is no longer held",
                ));
            }
        }
        if t
            .allocations
            .iter()
            .any(|a| a.source_tx_hash == s.tx_hash)
        {
            return Err(BondError::DatabaseQuery {
                reason: format!("allocation for {} already recorded", s.tx_hash),
            });
        }

        let listing = t
            .listing_mut(&s.listing_id)
            .ok_or_else(|| BondError::not_found("listing", &s.listing_id))?;
        listing.status = ListingStatus::Filled;
        listing.sold_tenths = s.units_tenths;
        t.listing_claims.remove(&s.listing_id);

        if let Some(offer_id) = &s.offer_id {
            if let Some(offer) = t.offer_mut(offer_id) {
                offer.status = OfferStatus::Accepted;
                offer.updated_at_ms = s.settled_at_ms;
            }
            t.offer_claims.remove(offer_id);
        }

        let rejected = t.reject_pending(&s.listing_id, s.settled_at_ms);
        t.allocations.push(s.resale_allocation());
        Ok(rejected)
    }

    fn cancel_listing(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError> {
        let mut t = self.lock();
        if t.listing_claims.contains_key(id) {
            return Ok(false);
        }
        match t.listing_mut(id) {
            Some(l) if l.status == ListingStatus::Open => l.status = ListingStatus::Cancelled,
            _ => return Ok(false),
        }
        t.reject_pending(id, updated_at_ms);
        Ok(true)
    }

    fn cancel_listing_from_chain(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError> {
        let mut t = self.lock();
        match t.listing_mut(id) {
            Some(l) if l.status == ListingStatus::Open => l.status = ListingStatus::Cancelled,
            _ => return Ok(false),
        }
        if let Some(token) = t.listing_claims.remove(id) {
            t.offer_claims.retain(|_, held| *held != token);
        }
        t.reject_pending(id, updated_at_ms);
        Ok(true)
    }

    fn insert_offer(&self, offer: &NegotiationOffer) -> Result<(), BondError> {
        self.lock().offers.push(offer.clone());
        Ok(())
    }

    fn get_offer(&self, id: &str) -> Result<Option<NegotiationOffer>, BondError> {
        Ok(self.lock().offers.iter().find(|o| o.id == id).cloned())
    }

    fn list_offers(&self, listing_id: Option<&str>) -> Result<Vec<NegotiationOffer>, BondError> {
        Ok(self
            .lock()
            .offers
            .iter()
            .filter(|o| listing_id.is_none_or(|l| o.listing_id == l))
            .cloned()
            .collect())
    }

    fn close_offer(
        &self,
        id: &str,
        to: OfferStatus,
        updated_at_ms: i64,
    ) -> Result<bool, BondError> {
        let mut t = self.lock();
        if t.offer_claims.contains_key(id) {
            return Ok(false);
        }
        match t.offer_mut(id) {
            Some(o) if o.status == OfferStatus::Pending => {
                o.status = to;
                o.updated_at_ms = updated_at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl WalletPort for MemoryStore {
    fn insert_wallet(&self, wallet: &CustodialWallet) -> Result<bool, BondError> {
        let mut t = self.lock();
        if t
            .wallets
            .iter()
            .any(|w| w.user_id == wallet.user_id || w.address == wallet.address)
        {
            return Ok(false);
        }
        t.wallets.push(wallet.clone());
        Ok(true)
    }

    fn find_wallet_by_user(&self, user_id: &str) -> Result<Option<CustodialWallet>, BondError> {
        Ok(self
            .lock()
            .wallets
            .iter()
            .find(|w| w.user_id == user_id)
            .cloned())
    }

    fn find_wallet_by_address(
        &self,
        address: &str,
    ) -> Result<Option<CustodialWallet>, BondError> {
        Ok(self
            .lock()
            .wallets
            .iter()
            .find(|w| w.address == address)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> BondSeries {
        BondSeries {
            id: "s1".into(),
            symbol: "GB".into(),
            name: "Green".into(),
            face_value_tenths: 1000,
            rate_bps: 500,
            tenure_days: 30,
            issuer_address: "0xi".into(),
            start_ms: 0,
            total_supply_tenths: 50,
            allocated_tenths: 0,
        }
    }

    fn primary(units: u64, tx: &str) -> Allocation {
        Allocation {
            id: tx.into(),
            bond_id: "s1".into(),
            holder: "0xa".into(),
            units_tenths: units,
            source: AllocationSource::Primary,
            source_tx_hash: tx.into(),
            created_at_ms: 0,
        }
    }

    #[test]
    fn duplicate_series_is_rejected() {
        let store = MemoryStore::new();
        store.insert_series(&series()).unwrap();
        assert!(store.insert_series(&series()).is_err());
    }

    #[test]
    fn primary_allocations_track_supply() {
        let store = MemoryStore::new();
        store.insert_series(&series()).unwrap();
        assert!(store.append_allocation(&primary(40, "t1")).unwrap());
        assert!(!store.append_allocation(&primary(40, "t1")).unwrap());
        assert!(matches!(
            store.append_allocation(&primary(11, "t2")),
            Err(BondError::Bounds { .. })
        ));
        assert_eq!(store.get_series("s1").unwrap().unwrap().allocated_tenths, 40);
    }

    #[test]
    fn claimed_listing_cannot_be_cancelled() {
        let store = MemoryStore::new();
        store.insert_series(&series()).unwrap();
        store.append_allocation(&primary(40, "t1")).unwrap();
        store
            .insert_listing_checked(&Listing {
                id: "l1".into(),
                bond_id: "s1".into(),
                seller: "0xa".into(),
                amount_tenths: 10,
                sold_tenths: 0,
                status: ListingStatus::Open,
                chain_listing_id: None,
                created_at_ms: 0,
            })
            .unwrap();
        assert!(store.claim_listing("l1", None, "tok").unwrap());
        assert!(!store.cancel_listing("l1", 1).unwrap());
        store.release_claim("l1", "tok").unwrap();
        assert!(store.cancel_listing("l1", 1).unwrap());
    }

    #[test]
    fn take_over_rekeys_the_claimed_offer() {
        let store = MemoryStore::new();
        store.insert_series(&series()).unwrap();
        store.append_allocation(&primary(40, "t1")).unwrap();
        store
            .insert_listing_checked(&Listing {
                id: "l1".into(),
                bond_id: "s1".into(),
                seller: "0xa".into(),
                amount_tenths: 10,
                sold_tenths: 0,
                status: ListingStatus::Open,
                chain_listing_id: None,
                created_at_ms: 0,
            })
            .unwrap();
        store
            .insert_offer(&NegotiationOffer {
                id: "o1".into(),
                bond_id: "s1".into(),
                listing_id: "l1".into(),
                buyer: "0xb".into(),
                seller: "0xa".into(),
                units_tenths: 10,
                original_rate_bps: 500,
                proposed_rate_bps: 500,
                proposed_total_amount_tenths: 1000,
                status: OfferStatus::Pending,
                note: None,
                created_at_ms: 0,
                updated_at_ms: 0,
            })
            .unwrap();
        assert!(store.claim_listing("l1", Some("o1"), "stale").unwrap());

        let taken = store.take_over_claim("l1", "fresh").unwrap().unwrap();
        assert_eq!(taken.offer_id.as_deref(), Some("o1"));
        // The old holder can no longer release or cancel.
        store.release_claim("l1", "stale").unwrap();
        assert!(!store.close_offer("o1", OfferStatus::Cancelled, 1).unwrap());

        assert!(store.cancel_listing_from_chain("l1", 2).unwrap());
        assert_eq!(store.get_offer("o1").unwrap().unwrap().status, OfferStatus::Rejected);
        assert!(store.take_over_claim("l1", "later").unwrap().is_none());
    }
}
