//! CSV export of the off-chain ledger.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::error::BondError;
use crate::domain::units::format_tenths;
use crate::ports::ledger_port::LedgerPort;

#[derive(Serialize)]
struct AllocationRow<'a> {
    id: &'a str,
    bond_id: &'a str,
    holder: &'a str,
    units: String,
    source: &'a str,
    source_tx_hash: &'a str,
    created_at_ms: i64,
}

#[derive(Serialize)]
struct ListingRow<'a> {
    id: &'a str,
    bond_id: &'a str,
    seller: &'a str,
    amount: String,
    sold: String,
    status: &'a str,
    chain_listing_id: &'a str,
    created_at_ms: i64,
}

#[derive(Serialize)]
struct OfferRow<'a> {
    id: &'a str,
    listing_id: &'a str,
    buyer: &'a str,
    seller: &'a str,
    units: String,
    original_rate_bps: u32,
    proposed_rate_bps: u32,
    proposed_total: String,
    status: &'a str,
    note: &'a str,
    updated_at_ms: i64,
}

/// Row counts per written file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub allocations: usize,
    pub listings: usize,
    pub offers: usize,
}

pub struct CsvExporter {
    base_path: PathBuf,
}

impl CsvExporter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Writes `allocations.csv`, `listings.csv` and `offers.csv`, optionally
    /// restricted to one bond.
    pub fn export(
        &self,
        ledger: &dyn LedgerPort,
        bond_id: Option<&str>,
    ) -> Result<ExportSummary, BondError> {
        fs::create_dir_all(&self.base_path)?;

        let allocations = ledger.list_allocations(bond_id)?;
        write_rows(
            &self.base_path.join("allocations.csv"),
            allocations.iter().map(|a| AllocationRow {
                id: &a.id,
                bond_id: &a.bond_id,
                holder: &a.holder,
                units: format_tenths(a.units_tenths),
                source: a.source.as_str(),
                source_tx_hash: &a.source_tx_hash,
                created_at_ms: a.created_at_ms,
            }),
        )?;

        let listings = ledger.list_listings(bond_id)?;
        write_rows(
            &self.base_path.join("listings.csv"),
            listings.iter().map(|l| ListingRow {
                id: &l.id,
                bond_id: &l.bond_id,
                seller: &l.seller,
                amount: format_tenths(l.amount_tenths),
                sold: format_tenths(l.sold_tenths),
                status: l.status.as_str(),
                chain_listing_id: l.chain_listing_id.as_deref().unwrap_or(""),
                created_at_ms: l.created_at_ms,
            }),
        )?;

        let offers: Vec<_> = ledger
            .list_offers(None)?
            .into_iter()
            .filter(|o| bond_id.is_none_or(|b| o.bond_id == b))
            .collect();
        write_rows(
            &self.base_path.join("offers.csv"),
            offers.iter().map(|o| OfferRow {
                id: &o.id,
                listing_id: &o.listing_id,
                buyer: &o.buyer,
                seller: &o.seller,
                units: format_tenths(o.units_tenths),
                original_rate_bps: o.original_rate_bps,
                proposed_rate_bps: o.proposed_rate_bps,
                proposed_total: format_tenths(o.proposed_total_amount_tenths),
                status: o.status.as_str(),
                note: o.note.as_deref().unwrap_or(""),
                updated_at_ms: o.updated_at_ms,
            }),
        )?;

        let summary = ExportSummary {
            allocations: allocations.len(),
            listings: listings.len(),
            offers: offers.len(),
        };
        tracing::info!(
            path = %self.base_path.display(),
            allocations = summary.allocations,
            listings = summary.listings,
            offers = summary.offers,
            "ledger exported"
        );
        Ok(summary)
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> Result<(), BondError> {
    let export_err = |e: csv::Error| BondError::Export {
        reason: format!("{}: {e}", path.display()),
    };
    let mut writer = csv::Writer::from_path(path).map_err(export_err)?;
    for row in rows {
        writer.serialize(row).map_err(export_err)?;
    }
    writer.flush()?;
    Ok(())
}
