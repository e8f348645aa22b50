//! Chain event indexing against the in-memory store.

mod common;

use bondledger::domain::chain::ChainReceipt;
use bondledger::domain::error::BondError;
use bondledger::domain::indexer::{Applied, ChainEvent, Indexer, SyncSummary};
use bondledger::domain::ledger::{self, Fill, ListingStatus};
use bondledger::domain::market;
use bondledger::domain::negotiation::{self, OfferRequest, OfferStatus};
use bondledger::ports::ledger_port::LedgerPort;
use common::*;

const SERIES: &str = "0xexternal";

fn series_created() -> ChainEvent {
    ChainEvent::SeriesCreated {
        tx_digest: "0xd1".into(),
        series_id: SERIES.into(),
        symbol: "EXT".into(),
        name: "External Bond".into(),
        face_value_tenths: FACE_TENTHS,
        rate_bps: RATE_BPS,
        tenure_days: 365,
        issuer_address: "0xissuer".into(),
        start_ms: START_MS,
        total_supply_tenths: 500,
    }
}

fn purchased(digest: &str, buyer: &str, amount_tenths: u64) -> ChainEvent {
    ChainEvent::PrimaryPurchased {
        tx_digest: digest.into(),
        series_id: SERIES.into(),
        buyer: buyer.into(),
        amount_tenths,
        timestamp_ms: START_MS,
    }
}

fn listed(digest: &str, series_id: &str, chain_id: &str, seller: &str, amount_tenths: u64) -> ChainEvent {
    ChainEvent::Listed {
        tx_digest: digest.into(),
        series_id: series_id.into(),
        chain_listing_id: chain_id.into(),
        seller: seller.into(),
        amount_tenths,
        timestamp_ms: START_MS,
    }
}

fn sold(digest: &str, chain_id: &str, buyer: &str, amount_tenths: u64) -> ChainEvent {
    ChainEvent::ListingSold {
        tx_digest: digest.into(),
        chain_listing_id: chain_id.into(),
        buyer: buyer.into(),
        amount_tenths,
        timestamp_ms: NOW_MS,
    }
}

#[test]
fn replaying_the_event_stream_is_idempotent() {
    let h = harness();
    for event in [
        series_created(),
        purchased("0xd2", "0xholder", 40),
        listed("0xd3", SERIES, "ext-1", "0xholder", 20),
        sold("0xd4", "ext-1", "0xbuyer", 20),
    ] {
        h.chain.push_event(event);
    }
    let indexer = Indexer::new(h.ledger.as_ref());

    let first = indexer.sync(h.chain.as_ref(), None, 100).unwrap();
    assert_eq!(
        first,
        SyncSummary {
            recorded: 4,
            duplicates: 0,
            skipped: 0,
            next_cursor: Some("4".into()),
        }
    );

    let again = indexer.sync(h.chain.as_ref(), None, 100).unwrap();
    assert_eq!((again.recorded, again.duplicates, again.skipped), (0, 3, 1));

    let series = h.ledger.get_series(SERIES).unwrap().unwrap();
    assert_eq!(series.allocated_tenths, 40);
    let holder = ledger::holdings(h.ledger.as_ref(), SERIES, "0xholder").unwrap();
    assert_eq!(holder.held_tenths(), 20);
    let buyer = ledger::holdings(h.ledger.as_ref(), SERIES, "0xbuyer").unwrap();
    assert_eq!(buyer.held_tenths(), 20);
    assert_eq!(h.ledger.list_allocations(Some(SERIES)).unwrap().len(), 2);
}

#[test]
fn paging_follows_the_cursor() {
    let h = harness();
    h.chain.push_event(series_created());
    h.chain.push_event(purchased("0xd2", "0xholder", 40));
    h.chain.push_event(purchased("0xd3", "0xholder", 10));
    let indexer = Indexer::new(h.ledger.as_ref());

    let page = indexer.sync(h.chain.as_ref(), None, 2).unwrap();
    assert_eq!(page.recorded, 2);
    assert_eq!(page.next_cursor.as_deref(), Some("2"));

    let rest = indexer
        .sync(h.chain.as_ref(), page.next_cursor.as_deref(), 2)
        .unwrap();
    assert_eq!(rest.recorded, 1);
    assert_eq!(
        ledger::holdings(h.ledger.as_ref(), SERIES, "0xholder")
            .unwrap()
            .held_tenths(),
        50
    );
}

#[test]
fn purchase_for_unknown_series_is_skipped() {
    let h = harness();
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(
        indexer.apply(&purchased("0xd2", "0xholder", 40)).unwrap(),
        Applied::Skipped
    );
}

#[test]
fn listing_beyond_holdings_is_skipped() {
    let h = harness();
    let indexer = Indexer::new(h.ledger.as_ref());
    indexer.apply(&series_created()).unwrap();
    indexer.apply(&purchased("0xd2", "0xholder", 10)).unwrap();
    assert_eq!(
        indexer
            .apply(&listed("0xd3", SERIES, "ext-1", "0xholder", 11))
            .unwrap(),
        Applied::Skipped
    );
    assert!(h.ledger.find_listing_by_chain_id("ext-1").unwrap().is_none());
}

#[test]
fn listed_event_confirms_an_unresolved_reservation() {
    let h = harness();
    let series = h.issue(1_000);
    let alice = h.user("alice");
    h.user("bob");
    h.buy("alice", &series, 30);

    h.chain.lose("list_for_sale");
    assert!(market::list_for_sale(&h.platform, "alice", &series.id, 20).is_err());
    h.chain.heal();

    let indexer = Indexer::new(h.ledger.as_ref());
    let applied = indexer
        .apply(&listed("0xd9", &series.id, "chain-late", &alice, 20))
        .unwrap();
    assert_eq!(applied, Applied::Recorded);

    let listings = ledger::listings_for_bond(h.ledger.as_ref(), &series.id).unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].chain_listing_id.as_deref(), Some("chain-late"));
    assert_eq!(
        ledger::unlisted_balance(h.ledger.as_ref(), &series.id, &alice).unwrap(),
        10
    );

    market::buy_listing(&h.platform, "bob", &listings[0].id).unwrap();
}

#[test]
fn sale_settled_by_the_platform_is_not_applied_twice() {
    let h = harness();
    let series = h.issue(1_000);
    h.user("alice");
    let bob = h.user("bob");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);
    market::buy_listing(&h.platform, "bob", &listing.id).unwrap();

    let chain_id = listing.chain_listing_id.clone().unwrap();
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(
        indexer.apply(&sold("0xd9", &chain_id, &bob, 20)).unwrap(),
        Applied::Skipped
    );
    assert_eq!(
        ledger::holdings(h.ledger.as_ref(), &series.id, &bob)
            .unwrap()
            .held_tenths(),
        20
    );
}

#[test]
fn cancellation_event_closes_the_listing() {
    let h = harness();
    let series = h.issue(1_000);
    let alice = h.user("alice");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);
    let chain_id = listing.chain_listing_id.clone().unwrap();

    let cancelled = ChainEvent::ListingCancelled {
        tx_digest: "0xd9".into(),
        chain_listing_id: chain_id,
        timestamp_ms: NOW_MS,
    };
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(indexer.apply(&cancelled).unwrap(), Applied::Recorded);
    assert_eq!(indexer.apply(&cancelled).unwrap(), Applied::Skipped);

    assert_eq!(
        ledger::get_listing(h.ledger.as_ref(), &listing.id)
            .unwrap()
            .status,
        ListingStatus::Cancelled
    );
    assert_eq!(
        ledger::unlisted_balance(h.ledger.as_ref(), &series.id, &alice).unwrap(),
        30
    );
}

#[test]
fn sale_with_unknown_outcome_is_resolved_by_the_sold_event() {
    let h = harness();
    let series = h.issue(1_000);
    let alice = h.user("alice");
    let bob = h.user("bob");
    h.user("carol");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);

    h.chain.lose("buy_from_listing");
    assert!(matches!(
        market::buy_listing(&h.platform, "bob", &listing.id),
        Err(BondError::ChainUnknownOutcome { .. })
    ));
    h.chain.heal();

    let chain_id = listing.chain_listing_id.clone().unwrap();
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(
        indexer.apply(&sold("0xd9", &chain_id, &bob, 20)).unwrap(),
        Applied::Recorded
    );

    let filled = ledger::get_listing(h.ledger.as_ref(), &listing.id).unwrap();
    assert_eq!(filled.status, ListingStatus::Filled);
    assert_eq!(filled.sold_tenths, 20);
    assert_eq!(
        ledger::holdings(h.ledger.as_ref(), &series.id, &bob)
            .unwrap()
            .held_tenths(),
        20
    );
    assert_eq!(
        ledger::holdings(h.ledger.as_ref(), &series.id, &alice)
            .unwrap()
            .held_tenths(),
        10
    );
    assert!(market::buy_listing(&h.platform, "carol", &listing.id).is_err());
}

#[test]
fn acceptance_with_unknown_outcome_is_resolved_by_the_sold_event() {
    let h = harness();
    let series = h.issue(1_000);
    h.user("alice");
    let bob = h.user("bob");
    h.user("carol");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);
    let make = |user: &str, units_tenths: u64| {
        negotiation::create_offer(
            &h.platform,
            user,
            &OfferRequest {
                listing_id: listing.id.clone(),
                units_tenths,
                proposed_rate_bps: RATE_BPS,
                note: None,
            },
        )
        .unwrap()
    };
    let bob_offer = make("bob", 15);
    let carol_offer = make("carol", 10);

    h.chain.lose("buy_from_listing");
    assert!(negotiation::accept_offer(&h.platform, &bob_offer.id, "alice").is_err());
    h.chain.heal();

    let chain_id = listing.chain_listing_id.clone().unwrap();
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(
        indexer.apply(&sold("0xd9", &chain_id, &bob, 15)).unwrap(),
        Applied::Recorded
    );
    assert_eq!(
        negotiation::get_offer(&h.platform, &bob_offer.id).unwrap().status,
        OfferStatus::Accepted
    );
    assert_eq!(
        negotiation::get_offer(&h.platform, &carol_offer.id).unwrap().status,
        OfferStatus::Rejected
    );
    assert_eq!(
        ledger::get_listing(h.ledger.as_ref(), &listing.id)
            .unwrap()
            .sold_tenths,
        15
    );
}

#[test]
fn cancellation_with_unknown_outcome_purchase_still_closes_the_listing() {
    let h = harness();
    let series = h.issue(1_000);
    let alice = h.user("alice");
    h.user("bob");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);

    h.chain.lose("buy_from_listing");
    assert!(market::buy_listing(&h.platform, "bob", &listing.id).is_err());
    h.chain.heal();

    let cancelled = ChainEvent::ListingCancelled {
        tx_digest: "0xd9".into(),
        chain_listing_id: listing.chain_listing_id.clone().unwrap(),
        timestamp_ms: NOW_MS,
    };
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(indexer.apply(&cancelled).unwrap(), Applied::Recorded);
    assert_eq!(
        ledger::get_listing(h.ledger.as_ref(), &listing.id)
            .unwrap()
            .status,
        ListingStatus::Cancelled
    );
    assert_eq!(
        ledger::unlisted_balance(h.ledger.as_ref(), &series.id, &alice).unwrap(),
        30
    );
}

#[test]
fn platform_fill_after_indexed_sale_is_not_an_error() {
    let h = harness();
    let series = h.issue(1_000);
    h.user("alice");
    let bob = h.user("bob");
    h.buy("alice", &series, 30);
    let listing = h.list("alice", &series, 20);
    assert!(h.ledger.claim_listing(&listing.id, None, "in-flight").unwrap());

    // The event lands before the platform records its own confirmation.
    let chain_id = listing.chain_listing_id.clone().unwrap();
    let indexer = Indexer::new(h.ledger.as_ref());
    assert_eq!(
        indexer.apply(&sold("0xd9", &chain_id, &bob, 20)).unwrap(),
        Applied::Recorded
    );

    let receipt = ChainReceipt {
        digest: "0xd9".into(),
        request_id: "req-late".into(),
        object_id: None,
    };
    let fill = Fill {
        listing: &listing,
        offer_id: None,
        claim_token: "in-flight",
        buyer: &bob,
        units_tenths: 20,
    };
    let rejected = ledger::fill_listing(h.ledger.as_ref(), &fill, &receipt, NOW_MS).unwrap();
    assert!(rejected.is_empty());
    assert_eq!(h.ledger.list_allocations(Some(&series.id)).unwrap().len(), 2);
}

#[test]
fn store_errors_propagate() {
    let h = harness();
    let indexer = Indexer::new(h.ledger.as_ref());
    indexer.apply(&series_created()).unwrap();
    let oversupply = purchased("0xd2", "0xholder", 501);
    assert!(matches!(
        indexer.apply(&oversupply),
        Err(BondError::Bounds { .. })
    ));
}
