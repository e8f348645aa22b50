//! SQLite ledger and wallet store.
//!
//! Status transitions are single `UPDATE ... WHERE status = ?` statements or
//! `BEGIN IMMEDIATE` transactions, so the write lock is taken before any row
//! is read and concurrent writers cannot interleave a check with its write.

use std::str::FromStr;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::domain::bond::BondSeries;
use crate::domain::config_validation::DEFAULT_POOL_SIZE;
use crate::domain::error::BondError;
use crate::domain::ledger::{
    Allocation, AllocationSource, Holdings, Listing, Settlement, TakenClaim,
};
use crate::domain::negotiation::{NegotiationOffer, OfferStatus};
use crate::domain::vault::CustodialWallet;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::wallet_port::WalletPort;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bond_series (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    face_value_tenths INTEGER NOT NULL,
    rate_bps INTEGER NOT NULL,
    tenure_days INTEGER NOT NULL,
    issuer_address TEXT NOT NULL,
    start_ms INTEGER NOT NULL,
    total_supply_tenths INTEGER NOT NULL,
    allocated_tenths INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS allocations (
    id TEXT PRIMARY KEY,
    bond_id TEXT NOT NULL REFERENCES bond_series(id),
    holder TEXT NOT NULL,
    units_tenths INTEGER NOT NULL CHECK (units_tenths > 0),
    source TEXT NOT NULL,
    source_tx_hash TEXT NOT NULL UNIQUE,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_allocations_holder ON allocations(bond_id, holder);
CREATE TABLE IF NOT EXISTS listings (
    id TEXT PRIMARY KEY,
    bond_id TEXT NOT NULL REFERENCES bond_series(id),
    seller TEXT NOT NULL,
    amount_tenths INTEGER NOT NULL CHECK (amount_tenths > 0),
    sold_tenths INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    chain_listing_id TEXT UNIQUE,
    claim_token TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_listings_seller ON listings(bond_id, seller, status);
CREATE TABLE IF NOT EXISTS negotiation_offers (
    id TEXT PRIMARY KEY,
    bond_id TEXT NOT NULL,
    listing_id TEXT NOT NULL REFERENCES listings(id),
    buyer TEXT NOT NULL,
    seller TEXT NOT NULL,
    units_tenths INTEGER NOT NULL,
    original_rate_bps INTEGER NOT NULL,
    proposed_rate_bps INTEGER NOT NULL,
    proposed_total_amount_tenths INTEGER NOT NULL,
    status TEXT NOT NULL,
    note TEXT,
    claim_token TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_offers_listing ON negotiation_offers(listing_id, status);
CREATE TABLE IF NOT EXISTS custodial_wallets (
    user_id TEXT PRIMARY KEY,
    address TEXT NOT NULL UNIQUE,
    encrypted_mnemonic TEXT NOT NULL
);";

const SERIES_COLUMNS: &str = "id, symbol, name, face_value_tenths, rate_bps, tenure_days, \
     issuer_address, start_ms, total_supply_tenths, allocated_tenths";
const ALLOCATION_COLUMNS: &str =
    "id, bond_id, holder, units_tenths, source, source_tx_hash, created_at_ms";
const LISTING_COLUMNS: &str =
    "id, bond_id, seller, amount_tenths, sold_tenths, status, chain_listing_id, created_at_ms";
const OFFER_COLUMNS: &str = "id, bond_id, listing_id, buyer, seller, units_tenths, \
     original_rate_bps, proposed_rate_bps, proposed_total_amount_tenths, status, note, \
     created_at_ms, updated_at_ms";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> BondError {
    BondError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> BondError {
    BondError::DatabaseQuery {
        reason: e.to_string(),
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BondError> {
        let db_path = config.require_string("database", "path")?;
        let pool_size = config.get_u64("database", "pool_size", DEFAULT_POOL_SIZE)?;
        let pool_size = u32::try_from(pool_size).unwrap_or(u32::MAX).max(1);

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|c| c.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        tracing::debug!(path = %db_path, pool_size, "sqlite pool ready");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, BondError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), BondError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, BondError> {
        self.pool.get().map_err(pool_err)
    }

    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, BondError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let rows = stmt.query_map(params, map).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, BondError> {
        self.conn()?
            .query_row(sql, params, map)
            .optional()
            .map_err(query_err)
    }
}

fn parsed<T: FromStr<Err = BondError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: BondError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn series_from_row(row: &Row<'_>) -> rusqlite::Result<BondSeries> {
    Ok(BondSeries {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        face_value_tenths: row.get(3)?,
        rate_bps: row.get(4)?,
        tenure_days: row.get(5)?,
        issuer_address: row.get(6)?,
        start_ms: row.get(7)?,
        total_supply_tenths: row.get(8)?,
        allocated_tenths: row.get(9)?,
    })
}

fn allocation_from_row(row: &Row<'_>) -> rusqlite::Result<Allocation> {
    Ok(Allocation {
        id: row.get(0)?,
        bond_id: row.get(1)?,
        holder: row.get(2)?,
        units_tenths: row.get(3)?,
        source: parsed(row, 4)?,
        source_tx_hash: row.get(5)?,
        created_at_ms: row.get(6)?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: row.get(0)?,
        bond_id: row.get(1)?,
        seller: row.get(2)?,
        amount_tenths: row.get(3)?,
        sold_tenths: row.get(4)?,
        status: parsed(row, 5)?,
        chain_listing_id: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<NegotiationOffer> {
    Ok(NegotiationOffer {
        id: row.get(0)?,
        bond_id: row.get(1)?,
        listing_id: row.get(2)?,
        buyer: row.get(3)?,
        seller: row.get(4)?,
        units_tenths: row.get(5)?,
        original_rate_bps: row.get(6)?,
        proposed_rate_bps: row.get(7)?,
        proposed_total_amount_tenths: row.get(8)?,
        status: parsed(row, 9)?,
        note: row.get(10)?,
        created_at_ms: row.get(11)?,
        updated_at_ms: row.get(12)?,
    })
}

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<CustodialWallet> {
    Ok(CustodialWallet {
        user_id: row.get(0)?,
        address: row.get(1)?,
        encrypted_mnemonic: row.get(2)?,
    })
}

fn holdings_in(conn: &Connection, bond_id: &str, holder: &str) -> Result<Holdings, BondError> {
    let allocated_tenths: u64 = conn
        .query_row(
            "SELECT COALESCE(SUM(units_tenths), 0) FROM allocations
             WHERE bond_id = ?1 AND holder = ?2",
            params![bond_id, holder],
            |r| r.get(0),
        )
        .map_err(query_err)?;
    let (sold_tenths, listed_tenths): (u64, u64) = conn
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'filled' THEN sold_tenths END), 0),
                COALESCE(SUM(CASE WHEN status = 'open' THEN amount_tenths END), 0)
             FROM listings WHERE bond_id = ?1 AND seller = ?2",
            params![bond_id, holder],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(query_err)?;
    Ok(Holdings {
        allocated_tenths,
        sold_tenths,
        listed_tenths,
    })
}

fn insert_allocation(conn: &Connection, a: &Allocation) -> Result<(), BondError> {
    conn.execute(
        &format!("INSERT INTO allocations ({ALLOCATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            a.id,
            a.bond_id,
            a.holder,
            a.units_tenths,
            a.source.as_str(),
            a.source_tx_hash,
            a.created_at_ms
        ],
    )
    .map_err(query_err)?;
    Ok(())
}

impl LedgerPort for SqliteAdapter {
    fn insert_series(&self, s: &BondSeries) -> Result<(), BondError> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO bond_series ({SERIES_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    s.id,
                    s.symbol,
                    s.name,
                    s.face_value_tenths,
                    s.rate_bps,
                    s.tenure_days,
                    s.issuer_address,
                    s.start_ms,
                    s.total_supply_tenths,
                    s.allocated_tenths
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn get_series(&self, id: &str) -> Result<Option<BondSeries>, BondError> {
        self.query_one(
            &format!("SELECT {SERIES_COLUMNS} FROM bond_series WHERE id = ?1"),
            params![id],
            series_from_row,
        )
    }

    fn list_series(&self) -> Result<Vec<BondSeries>, BondError> {
        self.query_all(
            &format!("SELECT {SERIES_COLUMNS} FROM bond_series ORDER BY start_ms, id"),
            params![],
            series_from_row,
        )
    }

    fn append_allocation(&self, allocation: &Allocation) -> Result<bool, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let seen: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM allocations WHERE source_tx_hash = ?1",
                params![allocation.source_tx_hash],
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if seen.is_some() {
            return Ok(false);
        }

        if allocation.source == AllocationSource::Primary {
            let series = tx
                .query_row(
                    &format!("SELECT {SERIES_COLUMNS} FROM bond_series WHERE id = ?1"),
                    params![allocation.bond_id],
                    series_from_row,
                )
                .optional()
                .map_err(query_err)?
                .ok_or_else(|| BondError::not_found("series", &allocation.bond_id))?;
            series.check_allocation(allocation.units_tenths)?;
            tx.execute(
                "UPDATE bond_series SET allocated_tenths = allocated_tenths + ?1 WHERE id = ?2",
                params![allocation.units_tenths, allocation.bond_id],
            )
            .map_err(query_err)?;
        }

        insert_allocation(&tx, allocation)?;
        tx.commit().map_err(query_err)?;
        Ok(true)
    }

    fn list_allocations(&self, bond_id: Option<&str>) -> Result<Vec<Allocation>, BondError> {
        self.query_all(
            &format!(
                "SELECT {ALLOCATION_COLUMNS} FROM allocations
                 WHERE ?1 IS NULL OR bond_id = ?1 ORDER BY created_at_ms, id"
            ),
            params![bond_id],
            allocation_from_row,
        )
    }

    fn holdings(&self, bond_id: &str, holder: &str) -> Result<Holdings, BondError> {
        let conn = self.conn()?;
        holdings_in(&conn, bond_id, holder)
    }

    fn insert_listing_checked(&self, listing: &Listing) -> Result<(), BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let available = holdings_in(&tx, &listing.bond_id, &listing.seller)?.unlisted_tenths();
        if listing.amount_tenths > available {
            return Err(BondError::bounds(format!(
                "{} has {available} unlisted tenths, cannot list {}",
                listing.seller, listing.amount_tenths
            )));
        }

        tx.execute(
            &format!(
                "INSERT INTO listings ({LISTING_COLUMNS}, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"
            ),
            params![
                listing.id,
                listing.bond_id,
                listing.seller,
                listing.amount_tenths,
                listing.sold_tenths,
                listing.status.as_str(),
                listing.chain_listing_id,
                listing.created_at_ms
            ],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)
    }

    fn get_listing(&self, id: &str) -> Result<Option<Listing>, BondError> {
        self.query_one(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"),
            params![id],
            listing_from_row,
        )
    }

    fn find_listing_by_chain_id(
        &self,
        chain_listing_id: &str,
    ) -> Result<Option<Listing>, BondError> {
        self.query_one(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE chain_listing_id = ?1"),
            params![chain_listing_id],
            listing_from_row,
        )
    }

    fn list_listings(&self, bond_id: Option<&str>) -> Result<Vec<Listing>, BondError> {
        self.query_all(
            &format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE ?1 IS NULL OR bond_id = ?1 ORDER BY created_at_ms, id"
            ),
            params![bond_id],
            listing_from_row,
        )
    }

    fn set_chain_listing_id(&self, id: &str, chain_listing_id: &str) -> Result<(), BondError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE listings SET chain_listing_id = ?1 WHERE id = ?2",
                params![chain_listing_id, id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(BondError::not_found("listing", id));
        }
        Ok(())
    }

    fn claim_listing(
        &self,
        listing_id: &str,
        offer_id: Option<&str>,
        token: &str,
    ) -> Result<bool, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let claimed = tx
            .execute(
                "UPDATE listings SET claim_token = ?1
                 WHERE id = ?2 AND status = 'open' AND claim_token IS NULL",
                params![token, listing_id],
            )
            .map_err(query_err)?;
        if claimed == 0 {
            return Ok(false);
        }

        if let Some(offer_id) = offer_id {
            let claimed = tx
                .execute(
                    "UPDATE negotiation_offers SET claim_token = ?1
                     WHERE id = ?2 AND listing_id = ?3 AND status = 'pending'
                       AND claim_token IS NULL",
                    params![token, offer_id, listing_id],
                )
                .map_err(query_err)?;
            if claimed == 0 {
                // Dropping the transaction rolls back the listing claim.
                return Ok(false);
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(true)
    }

    fn release_claim(&self, listing_id: &str, token: &str) -> Result<(), BondError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute(
            "UPDATE listings SET claim_token = NULL WHERE id = ?1 AND claim_token = ?2",
            params![listing_id, token],
        )
        .map_err(query_err)?;
        tx.execute(
            "UPDATE negotiation_offers SET claim_token = NULL
             WHERE listing_id = ?1 AND claim_token = ?2",
            params![listing_id, token],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)
    }

    fn take_over_claim(
        &self,
        listing_id: &str,
        token: &str,
    ) -> Result<Option<TakenClaim>, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let previous: Option<Option<String>> = tx
            .query_row(
                "SELECT claim_token FROM listings WHERE id = ?1 AND status = 'open'",
                params![listing_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE listings SET claim_token = ?1 WHERE id = ?2",
            params![token, listing_id],
        )
        .map_err(query_err)?;
        let mut offer_id = None;
        if let Some(previous) = previous {
            offer_id = tx
                .query_row(
                    "SELECT id FROM negotiation_offers WHERE listing_id = ?1 AND claim_token = ?2",
                    params![listing_id, previous],
                    |r| r.get(0),
                )
                .optional()
                .map_err(query_err)?;
            tx.execute(
                "UPDATE negotiation_offers SET claim_token = ?1
                 WHERE listing_id = ?2 AND claim_token = ?3",
                params![token, listing_id, previous],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(Some(TakenClaim { offer_id }))
    }

    fn settle_listing(&self, s: &Settlement) -> Result<Vec<String>, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let filled = tx
            .execute(
                "UPDATE listings
                 SET status = 'filled', sold_tenths = ?1, claim_token = NULL, updated_at_ms = ?2
                 WHERE id = ?3 AND status = 'open' AND claim_token = ?4",
                params![s.units_tenths, s.settled_at_ms, s.listing_id, s.claim_token],
            )
            .map_err(query_err)?;
        if filled == 0 {
            return Err(BondError::conflict(
                "listing",
                &s.listing_id,
                "settlement claim is no longer held",
            ));
        }

        if let Some(offer_id) = &s.offer_id {
            let accepted = tx
                .execute(
                    "UPDATE negotiation_offers
                     SET status = 'accepted', claim_token = NULL, updated_at_ms = ?1
                     WHERE id = ?2 AND status = 'pending' AND claim_token = ?3",
                    params![s.settled_at_ms, offer_id, s.claim_token],
                )
                .map_err(query_err)?;
            if accepted == 0 {
                return Err(BondError::conflict(
                    "offer",
                    offer_id,
                    "settlement claim is no longer held",
                ));
            }
        }

        let rejected: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM negotiation_offers
                     WHERE listing_id = ?1 AND status = 'pending' ORDER BY created_at_ms, id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map(params![s.listing_id], |r| r.get(0))
                .map_err(query_err)?;
            rows.collect::<Result<_, _>>().map_err(query_err)?
        };
        tx.execute(
            "UPDATE negotiation_offers
             SET status = 'rejected', claim_token = NULL, updated_at_ms = ?1
             WHERE listing_id = ?2 AND status = 'pending'",
            params![s.settled_at_ms, s.listing_id],
        )
        .map_err(query_err)?;

        insert_allocation(&tx, &s.resale_allocation())?;
        tx.commit().map_err(query_err)?;
        Ok(rejected)
    }

    fn cancel_listing(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        let cancelled = tx
            .execute(
                "UPDATE listings SET status = 'cancelled', updated_at_ms = ?1
                 WHERE id = ?2 AND status = 'open' AND claim_token IS NULL",
                params![updated_at_ms, id],
            )
            .map_err(query_err)?;
        if cancelled == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE negotiation_offers SET status = 'rejected', updated_at_ms = ?1
             WHERE listing_id = ?2 AND status = 'pending'",
            params![updated_at_ms, id],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(true)
    }

    fn cancel_listing_from_chain(&self, id: &str, updated_at_ms: i64) -> Result<bool, BondError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        let cancelled = tx
            .execute(
                "UPDATE listings
                 SET status = 'cancelled', claim_token = NULL, updated_at_ms = ?1
                 WHERE id = ?2 AND status = 'open'",
                params![updated_at_ms, id],
            )
            .map_err(query_err)?;
        if cancelled == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE negotiation_offers
             SET status = 'rejected', claim_token = NULL, updated_at_ms = ?1
             WHERE listing_id = ?2 AND status = 'pending'",
            params![updated_at_ms, id],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(true)
    }

    fn insert_offer(&self, o: &NegotiationOffer) -> Result<(), BondError> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO negotiation_offers ({OFFER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    o.id,
                    o.bond_id,
                    o.listing_id,
                    o.buyer,
                    o.seller,
                    o.units_tenths,
                    o.original_rate_bps,
                    o.proposed_rate_bps,
                    o.proposed_total_amount_tenths,
                    o.status.as_str(),
                    o.note,
                    o.created_at_ms,
                    o.updated_at_ms
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn get_offer(&self, id: &str) -> Result<Option<NegotiationOffer>, BondError> {
        self.query_one(
            &format!("SELECT {OFFER_COLUMNS} FROM negotiation_offers WHERE id = ?1"),
            params![id],
            offer_from_row,
        )
    }

    fn list_offers(&self, listing_id: Option<&str>) -> Result<Vec<NegotiationOffer>, BondError> {
        self.query_all(
            &format!(
                "SELECT {OFFER_COLUMNS} FROM negotiation_offers
                 WHERE ?1 IS NULL OR listing_id = ?1 ORDER BY created_at_ms, id"
            ),
            params![listing_id],
            offer_from_row,
        )
    }

    fn close_offer(
        &self,
        id: &str,
        to: OfferStatus,
        updated_at_ms: i64,
    ) -> Result<bool, BondError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE negotiation_offers SET status = ?1, updated_at_ms = ?2
                 WHERE id = ?3 AND status = 'pending' AND claim_token IS NULL",
                params![to.as_str(), updated_at_ms, id],
            )
            .map_err(query_err)?;
        Ok(changed == 1)
    }
}

impl WalletPort for SqliteAdapter {
    fn insert_wallet(&self, wallet: &CustodialWallet) -> Result<bool, BondError> {
        let changed = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO custodial_wallets (user_id, address, encrypted_mnemonic)
                 VALUES (?1, ?2, ?3)",
                params![wallet.user_id, wallet.address, wallet.encrypted_mnemonic],
            )
            .map_err(query_err)?;
        Ok(changed == 1)
    }

    fn find_wallet_by_user(&self, user_id: &str) -> Result<Option<CustodialWallet>, BondError> {
        self.query_one(
            "SELECT user_id, address, encrypted_mnemonic FROM custodial_wallets WHERE user_id = ?1",
            params![user_id],
            wallet_from_row,
        )
    }

    fn find_wallet_by_address(
        &self,
        address: &str,
    ) -> Result<Option<CustodialWallet>, BondError> {
        self.query_one(
            "SELECT user_id, address, encrypted_mnemonic FROM custodial_wallets WHERE address = ?1",
            params![address],
            wallet_from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::ListingStatus;

    struct MockConfig;

    impl ConfigPort for MockConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn store() -> SqliteAdapter {
        let db = SqliteAdapter::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.insert_series(&BondSeries {
            id: "0xs1".into(),
            symbol: "GB26".into(),
            name: "Green Bond 2026".into(),
            face_value_tenths: 1000,
            rate_bps: 500,
            tenure_days: 365,
            issuer_address: "0xissuer".into(),
            start_ms: 0,
            total_supply_tenths: 100,
            allocated_tenths: 0,
        })
        .unwrap();
        db
    }

    fn allocation(holder: &str, units: u64, tx: &str) -> Allocation {
        Allocation {
            id: format!("a-{tx}"),
            bond_id: "0xs1".into(),
            holder: holder.into(),
            units_tenths: units,
            source: AllocationSource::Primary,
            source_tx_hash: tx.into(),
            created_at_ms: 1,
        }
    }

    fn listing(id: &str, seller: &str, amount: u64) -> Listing {
        Listing {
            id: id.into(),
            bond_id: "0xs1".into(),
            seller: seller.into(),
            amount_tenths: amount,
            sold_tenths: 0,
            status: ListingStatus::Open,
            chain_listing_id: Some(format!("chain-{id}")),
            created_at_ms: 2,
        }
    }

    fn offer(id: &str, listing_id: &str, buyer: &str) -> NegotiationOffer {
        NegotiationOffer {
            id: id.into(),
            bond_id: "0xs1".into(),
            listing_id: listing_id.into(),
            buyer: buyer.into(),
            seller: "0xalice".into(),
            units_tenths: 10,
            original_rate_bps: 500,
            proposed_rate_bps: 510,
            proposed_total_amount_tenths: 1000,
            status: OfferStatus::Pending,
            note: None,
            created_at_ms: 3,
            updated_at_ms: 3,
        }
    }

    fn settlement(listing_id: &str, offer_id: Option<&str>, token: &str) -> Settlement {
        Settlement {
            listing_id: listing_id.into(),
            offer_id: offer_id.map(str::to_string),
            claim_token: token.into(),
            bond_id: "0xs1".into(),
            buyer: "0xbob".into(),
            units_tenths: 10,
            allocation_id: "resale-1".into(),
            tx_hash: "0xresale".into(),
            settled_at_ms: 9,
        }
    }

    #[test]
    fn from_config_missing_path() {
        let result = SqliteAdapter::from_config(&MockConfig);
        assert!(matches!(result, Err(BondError::ConfigMissing { .. })));
    }

    #[test]
    fn schema_is_idempotent() {
        let db = store();
        db.initialize_schema().unwrap();
        assert_eq!(db.list_series().unwrap().len(), 1);
    }

    #[test]
    fn allocation_is_idempotent_on_tx_hash() {
        let db = store();
        assert!(db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap());
        assert!(!db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap());
        assert_eq!(db.get_series("0xs1").unwrap().unwrap().allocated_tenths, 30);
        assert_eq!(db.holdings("0xs1", "0xalice").unwrap().allocated_tenths, 30);
    }

    #[test]
    fn primary_allocation_cannot_exceed_supply() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 90, "0xt1")).unwrap();
        let err = db.append_allocation(&allocation("0xbob", 11, "0xt2")).unwrap_err();
        assert!(matches!(err, BondError::Bounds { .. }));
        assert_eq!(db.get_series("0xs1").unwrap().unwrap().allocated_tenths, 90);
    }

    #[test]
    fn listing_is_bounded_by_unlisted_balance() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 20)).unwrap();
        let err = db
            .insert_listing_checked(&listing("l2", "0xalice", 11))
            .unwrap_err();
        assert!(matches!(err, BondError::Bounds { .. }));
        db.insert_listing_checked(&listing("l2", "0xalice", 10)).unwrap();
        assert_eq!(db.holdings("0xs1", "0xalice").unwrap().unlisted_tenths(), 0);
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        assert!(db.claim_listing("l1", None, "t1").unwrap());
        assert!(!db.claim_listing("l1", None, "t2").unwrap());
        assert!(!db.cancel_listing("l1", 5).unwrap());
        db.release_claim("l1", "t1").unwrap();
        assert!(db.claim_listing("l1", None, "t2").unwrap());
    }

    #[test]
    fn claim_with_closed_offer_rolls_back_listing_claim() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        db.insert_offer(&offer("o1", "l1", "0xbob")).unwrap();
        assert!(db.close_offer("o1", OfferStatus::Cancelled, 4).unwrap());
        assert!(!db.claim_listing("l1", Some("o1"), "t1").unwrap());
        assert!(db.claim_listing("l1", None, "t2").unwrap());
    }

    #[test]
    fn settle_accepts_offer_and_rejects_the_rest() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        db.insert_offer(&offer("o1", "l1", "0xbob")).unwrap();
        db.insert_offer(&offer("o2", "l1", "0xcarol")).unwrap();
        db.insert_offer(&offer("o3", "l1", "0xdave")).unwrap();

        assert!(db.claim_listing("l1", Some("o1"), "tok").unwrap());
        let rejected = db.settle_listing(&settlement("l1", Some("o1"), "tok")).unwrap();
        assert_eq!(rejected, vec!["o2".to_string(), "o3".to_string()]);

        let l = db.get_listing("l1").unwrap().unwrap();
        assert_eq!(l.status, ListingStatus::Filled);
        assert_eq!(l.sold_tenths, 10);
        assert_eq!(db.get_offer("o1").unwrap().unwrap().status, OfferStatus::Accepted);
        assert_eq!(db.get_offer("o3").unwrap().unwrap().status, OfferStatus::Rejected);

        let alice = db.holdings("0xs1", "0xalice").unwrap();
        assert_eq!(alice.held_tenths(), 20);
        assert_eq!(alice.unlisted_tenths(), 20);
        assert_eq!(db.holdings("0xs1", "0xbob").unwrap().held_tenths(), 10);
    }

    #[test]
    fn settle_without_claim_conflicts() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        let err = db.settle_listing(&settlement("l1", None, "nope")).unwrap_err();
        assert!(matches!(err, BondError::ConcurrencyConflict { .. }));
        assert_eq!(
            db.get_listing("l1").unwrap().unwrap().status,
            ListingStatus::Open
        );
    }

    #[test]
    fn cancel_rejects_pending_offers() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        db.insert_offer(&offer("o1", "l1", "0xbob")).unwrap();
        assert!(db.cancel_listing("l1", 7).unwrap());
        assert!(!db.cancel_listing("l1", 8).unwrap());
        assert_eq!(db.get_offer("o1").unwrap().unwrap().status, OfferStatus::Rejected);
        assert_eq!(db.holdings("0xs1", "0xalice").unwrap().unlisted_tenths(), 30);
    }

    #[test]
    fn take_over_moves_a_stranded_claim() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        db.insert_offer(&offer("o1", "l1", "0xbob")).unwrap();
        db.insert_offer(&offer("o2", "l1", "0xcarol")).unwrap();
        assert!(db.claim_listing("l1", Some("o1"), "stale").unwrap());

        let taken = db.take_over_claim("l1", "fresh").unwrap().unwrap();
        assert_eq!(taken.offer_id.as_deref(), Some("o1"));
        assert!(db.settle_listing(&settlement("l1", None, "stale")).is_err());
        let rejected = db.settle_listing(&settlement("l1", Some("o1"), "fresh")).unwrap();
        assert_eq!(rejected, vec!["o2".to_string()]);
        assert_eq!(db.get_offer("o1").unwrap().unwrap().status, OfferStatus::Accepted);
        assert!(db.take_over_claim("l1", "later").unwrap().is_none());
    }

    #[test]
    fn chain_cancellation_overrides_a_claim() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        db.insert_listing_checked(&listing("l1", "0xalice", 10)).unwrap();
        db.insert_offer(&offer("o1", "l1", "0xbob")).unwrap();
        assert!(db.claim_listing("l1", Some("o1"), "stale").unwrap());
        assert!(!db.cancel_listing("l1", 7).unwrap());

        assert!(db.cancel_listing_from_chain("l1", 7).unwrap());
        assert!(!db.cancel_listing_from_chain("l1", 8).unwrap());
        assert_eq!(db.get_offer("o1").unwrap().unwrap().status, OfferStatus::Rejected);
        assert_eq!(db.holdings("0xs1", "0xalice").unwrap().unlisted_tenths(), 30);
    }

    #[test]
    fn find_listing_by_chain_id() {
        let db = store();
        db.append_allocation(&allocation("0xalice", 30, "0xt1")).unwrap();
        let mut l = listing("l1", "0xalice", 10);
        l.chain_listing_id = None;
        db.insert_listing_checked(&l).unwrap();
        assert!(db.find_listing_by_chain_id("77").unwrap().is_none());
        db.set_chain_listing_id("l1", "77").unwrap();
        assert_eq!(db.find_listing_by_chain_id("77").unwrap().unwrap().id, "l1");
        assert!(db.set_chain_listing_id("missing", "78").is_err());
    }

    #[test]
    fn wallets_are_unique_per_user() {
        let db = store();
        let w = CustodialWallet {
            user_id: "u1".into(),
            address: "0xaddr".into(),
            encrypted_mnemonic: "iv:ct".into(),
        };
        assert!(db.insert_wallet(&w).unwrap());
        assert!(!db.insert_wallet(&w).unwrap());
        assert_eq!(db.find_wallet_by_address("0xaddr").unwrap().unwrap().user_id, "u1");
        assert!(db.find_wallet_by_user("u2").unwrap().is_none());
    }
}
