//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_export_adapter::CsvExporter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::http_chain_adapter::HttpChainAdapter;
use crate::adapters::sqlite_adapter::SqliteAdapter;
use crate::domain::config_validation::{sponsor_policy, validate_config, validate_database, validate_vault};
use crate::domain::error::BondError;
use crate::domain::indexer::Indexer;
use crate::domain::market;
use crate::domain::platform::Platform;
use crate::domain::sponsorship::GasSponsor;
use crate::domain::units::{format_tenths, to_tenths};
use crate::domain::vault::CustodialVault;
use crate::ports::clock_port::{Clock, SystemClock};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "bondledger", about = "Custodial bond tokenization ledger")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "bondledger.ini")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the ledger tables
    InitDb,
    /// Check every configuration section
    Validate,
    /// Provision a custodial wallet for a user (idempotent)
    NewWallet {
        #[arg(long)]
        user: String,
    },
    /// Print a user's wallet address after checking the sealed key restores to it
    WalletAddress {
        #[arg(long)]
        user: String,
    },
    /// Price a primary purchase or an open listing
    Quote {
        #[arg(long, conflicts_with = "listing", required_unless_present = "listing")]
        series: Option<String>,
        #[arg(long, requires = "series")]
        amount: Option<String>,
        #[arg(long)]
        listing: Option<String>,
    },
    /// Show a holder's position in one series
    Holdings {
        #[arg(long)]
        series: String,
        #[arg(long)]
        address: String,
    },
    /// Write allocations, listings and offers to CSV files
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        series: Option<String>,
    },
    /// Pull one page of chain events into the ledger
    Index {
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Mint platform stablecoin to an address
    Mint {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&config);

    let result = match cli.command {
        Command::InitDb => run_init_db(&config),
        Command::Validate => run_validate(&config),
        Command::NewWallet { user } => run_new_wallet(&config, &user),
        Command::WalletAddress { user } => run_wallet_address(&config, &user),
        Command::Quote {
            series,
            amount,
            listing,
        } => run_quote(&config, series.as_deref(), amount.as_deref(), listing.as_deref()),
        Command::Holdings { series, address } => run_holdings(&config, &series, &address),
        Command::Export { output, series } => run_export(&config, &output, series.as_deref()),
        Command::Index { cursor, limit } => run_index(&config, cursor.as_deref(), limit),
        Command::Mint { recipient, amount } => run_mint(&config, &recipient, &amount),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = BondError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// `RUST_LOG` wins over `[log] filter`. Safe to call more than once.
pub fn init_logging(config: &dyn ConfigPort) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = config
            .get_string("log", "filter")
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn open_store(config: &dyn ConfigPort) -> Result<Arc<SqliteAdapter>, BondError> {
    validate_database(config)?;
    let store = SqliteAdapter::from_config(config)?;
    store.initialize_schema()?;
    Ok(Arc::new(store))
}

pub fn open_vault(config: &dyn ConfigPort) -> Result<Arc<CustodialVault>, BondError> {
    validate_vault(config)?;
    let secret = config.require_string("vault", "server_secret")?;
    Ok(Arc::new(CustodialVault::new(&secret)?))
}

/// Wires the full platform from configuration.
pub fn build_platform(config: &dyn ConfigPort) -> Result<Platform, BondError> {
    validate_config(config)?;
    let store = open_store(config)?;
    let vault = open_vault(config)?;
    let chain = Arc::new(HttpChainAdapter::from_config(config)?);
    let sponsor = GasSponsor::new(
        config.require_string("sponsor", "encrypted_mnemonic")?,
        sponsor_policy(config)?,
    );

    let platform = Platform::new(
        store.clone(),
        store,
        chain,
        vault,
        sponsor,
        Arc::new(SystemClock),
    );
    Ok(match config.get_string("chain", "admin_encrypted_mnemonic") {
        Some(sealed) if !sealed.trim().is_empty() => platform.with_admin(sealed.trim()),
        _ => platform,
    })
}

fn run_init_db(config: &dyn ConfigPort) -> Result<(), BondError> {
    open_store(config)?;
    eprintln!("Ledger schema ready.");
    Ok(())
}

fn run_validate(config: &dyn ConfigPort) -> Result<(), BondError> {
    validate_config(config)?;
    let vault = open_vault(config)?;
    let sponsor = vault.restore(&config.require_string("sponsor", "encrypted_mnemonic")?)?;
    eprintln!("Sponsor wallet: {}", sponsor.address());
    if let Some(sealed) = config.get_string("chain", "admin_encrypted_mnemonic") {
        let admin = vault.restore(sealed.trim())?;
        eprintln!("Admin wallet:   {}", admin.address());
    }
    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn run_new_wallet(config: &dyn ConfigPort, user: &str) -> Result<(), BondError> {
    let store = open_store(config)?;
    let vault = open_vault(config)?;
    let wallet = vault.provision(store.as_ref(), user)?;
    println!("{}", wallet.address);
    Ok(())
}

fn run_wallet_address(config: &dyn ConfigPort, user: &str) -> Result<(), BondError> {
    let store = open_store(config)?;
    let vault = open_vault(config)?;
    let signer = vault.signer_for(store.as_ref(), user)?;
    println!("{}", signer.address());
    Ok(())
}

fn run_quote(
    config: &dyn ConfigPort,
    series_id: Option<&str>,
    amount: Option<&str>,
    listing_id: Option<&str>,
) -> Result<(), BondError> {
    let store = open_store(config)?;
    let now = SystemClock.now_ms();

    let quote = match (series_id, listing_id) {
        (_, Some(listing_id)) => market::listing_quote(store.as_ref(), listing_id, now)?,
        (Some(series_id), None) => {
            let amount = amount.ok_or_else(|| BondError::validation("--amount is required"))?;
            market::primary_quote(store.as_ref(), series_id, to_tenths(amount)?)?
        }
        (None, None) => return Err(BondError::validation("--series or --listing is required")),
    };

    println!("amount:   {}", format_tenths(quote.amount_tenths));
    println!("face:     {}", format_tenths(quote.face_tenths));
    println!("interest: {} ({} days)", format_tenths(quote.interest_tenths), quote.accrued_days);
    println!("total:    {}", format_tenths(quote.total_tenths));
    Ok(())
}

fn run_holdings(config: &dyn ConfigPort, series_id: &str, address: &str) -> Result<(), BondError> {
    let store = open_store(config)?;
    let h = store.holdings(series_id, address)?;
    println!("allocated: {}", format_tenths(h.allocated_tenths));
    println!("sold:      {}", format_tenths(h.sold_tenths));
    println!("held:      {}", format_tenths(h.held_tenths()));
    println!("listed:    {}", format_tenths(h.listed_tenths));
    println!("unlisted:  {}", format_tenths(h.unlisted_tenths()));
    Ok(())
}

fn run_export(config: &dyn ConfigPort, output: &Path, series_id: Option<&str>) -> Result<(), BondError> {
    let store = open_store(config)?;
    let summary = CsvExporter::new(output.to_path_buf()).export(store.as_ref(), series_id)?;
    eprintln!(
        "Exported {} allocations, {} listings, {} offers to {}",
        summary.allocations,
        summary.listings,
        summary.offers,
        output.display()
    );
    Ok(())
}

fn run_index(config: &dyn ConfigPort, cursor: Option<&str>, limit: usize) -> Result<(), BondError> {
    let store = open_store(config)?;
    let chain = HttpChainAdapter::from_config(config)?;
    let summary = Indexer::new(store.as_ref()).sync(&chain, cursor, limit)?;
    eprintln!(
        "{} recorded, {} duplicates, {} skipped",
        summary.recorded, summary.duplicates, summary.skipped
    );
    if let Some(next) = summary.next_cursor {
        println!("{next}");
    }
    Ok(())
}

fn run_mint(config: &dyn ConfigPort, recipient: &str, amount: &str) -> Result<(), BondError> {
    let platform = build_platform(config)?;
    let receipt = market::mint_stablecoin(&platform, recipient, to_tenths(amount)?)?;
    println!("{}", receipt.digest);
    Ok(())
}
