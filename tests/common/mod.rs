#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bondledger::adapters::memory_adapter::MemoryStore;
use bondledger::domain::bond::{BondSeries, SeriesTerms};
use bondledger::domain::chain::{ChainReceipt, CoinType, ContractCall, TxStatus};
use bondledger::domain::error::BondError;
use bondledger::domain::indexer::{ChainEvent, EventPage};
use bondledger::domain::ledger::Listing;
use bondledger::domain::market;
use bondledger::domain::platform::Platform;
use bondledger::domain::pricing::MS_PER_DAY;
use bondledger::domain::sponsorship::{GasSponsor, SponsorPolicy};
use bondledger::domain::vault::{CustodialSigner, CustodialVault};
use bondledger::ports::chain_port::ChainPort;
use bondledger::ports::clock_port::FixedClock;
use bondledger::ports::ledger_port::LedgerPort;
use bondledger::ports::wallet_port::WalletPort;

pub const SECRET: &str = "integration-test-server-secret";
pub const START_MS: i64 = 1_700_000_000_000;
pub const NOW_MS: i64 = START_MS + 30 * MS_PER_DAY;
pub const FACE_TENTHS: u64 = 1000;
pub const RATE_BPS: u32 = 500;
pub const POLICY: SponsorPolicy = SponsorPolicy {
    min_balance: 100,
    top_up: 1_000,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub sender: String,
    pub call: ContractCall,
}

#[derive(Debug, Clone)]
enum Failure {
    Rejected(String),
    Unknown,
}

/// In-process chain gateway. Records every submission and moves gas on
/// `transfer_gas`; other calls always confirm unless told to fail.
#[derive(Default)]
pub struct MockChain {
    balances: Mutex<HashMap<(String, &'static str), u64>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<&'static str, Failure>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    events: Mutex<Vec<ChainEvent>>,
    seq: AtomicU64,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: &str, coin: CoinType, amount: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert((address.to_string(), coin.as_str()), amount);
    }

    pub fn fail(&self, method: &'static str, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method, Failure::Rejected(reason.to_string()));
    }

    pub fn lose(&self, method: &'static str) {
        self.failures.lock().unwrap().insert(method, Failure::Unknown);
    }

    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn delay(&self, method: &'static str, by: Duration) {
        self.delays.lock().unwrap().insert(method, by);
    }

    pub fn push_event(&self, event: ChainEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    fn balance(&self, address: &str, coin: CoinType) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(&(address.to_string(), coin.as_str()))
            .copied()
            .unwrap_or(0)
    }
}

impl ChainPort for MockChain {
    fn submit(
        &self,
        signer: &CustodialSigner,
        call: &ContractCall,
    ) -> Result<ChainReceipt, BondError> {
        let method = call.method();
        let delay = self.delays.lock().unwrap().get(method).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let request_id = format!("req-{n}");
        let failure = self.failures.lock().unwrap().get(method).cloned();
        match failure {
            Some(Failure::Rejected(reason)) => return Err(BondError::chain(method, reason)),
            Some(Failure::Unknown) => {
                return Err(BondError::ChainUnknownOutcome {
                    method: method.to_string(),
                    request_id,
                });
            }
            None => {}
        }

        self.calls.lock().unwrap().push(RecordedCall {
            method,
            sender: signer.address().to_string(),
            call: call.clone(),
        });

        let object_id = match call {
            ContractCall::CreateSeries(_) => Some(format!("0xseries{n}")),
            ContractCall::ListForSale { .. } => Some(format!("chain-listing-{n}")),
            ContractCall::TransferGas { recipient, amount } => {
                let mut balances = self.balances.lock().unwrap();
                let from = balances
                    .entry((signer.address().to_string(), CoinType::Gas.as_str()))
                    .or_insert(0);
                *from = from.saturating_sub(*amount);
                *balances
                    .entry((recipient.clone(), CoinType::Gas.as_str()))
                    .or_insert(0) += amount;
                None
            }
            _ => None,
        };

        Ok(ChainReceipt {
            digest: format!("0xdigest{n}"),
            request_id,
            object_id,
        })
    }

    fn get_balance(&self, address: &str, coin: CoinType) -> Result<u64, BondError> {
        Ok(self.balance(address, coin))
    }

    fn transaction_status(&self, _request_id: &str) -> Result<TxStatus, BondError> {
        Ok(TxStatus::Unknown)
    }

    fn poll_events(&self, cursor: Option<&str>, limit: usize) -> Result<EventPage, BondError> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let events = self.events.lock().unwrap();
        let page: Vec<ChainEvent> = events.iter().skip(start).take(limit).cloned().collect();
        let end = start + page.len();
        Ok(EventPage {
            events: page,
            next_cursor: Some(end.to_string()),
        })
    }
}

pub struct Harness {
    pub platform: Platform,
    pub chain: Arc<MockChain>,
    pub ledger: Arc<dyn LedgerPort>,
    pub sponsor_address: String,
    pub admin_address: String,
}

/// A platform over an in-memory store with a well-funded sponsor.
pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_with(store.clone(), store)
}

pub fn harness_with(ledger: Arc<dyn LedgerPort>, wallets: Arc<dyn WalletPort>) -> Harness {
    let vault = Arc::new(CustodialVault::new(SECRET).unwrap());
    let sponsor = vault.generate().unwrap();
    let admin = vault.generate().unwrap();
    let chain = Arc::new(MockChain::new());
    chain.set_balance(&sponsor.address, CoinType::Gas, 1_000_000);
    chain.set_balance(&admin.address, CoinType::Gas, 1_000_000);

    let platform = Platform::new(
        ledger.clone(),
        wallets,
        chain.clone(),
        vault,
        GasSponsor::new(sponsor.encrypted_mnemonic, POLICY),
        Arc::new(FixedClock(NOW_MS)),
    )
    .with_admin(admin.encrypted_mnemonic);

    Harness {
        platform,
        chain,
        ledger,
        sponsor_address: sponsor.address,
        admin_address: admin.address,
    }
}

pub fn terms(total_supply_tenths: u64) -> SeriesTerms {
    SeriesTerms {
        symbol: "GB26".into(),
        name: "Green Bond 2026".into(),
        face_value_tenths: FACE_TENTHS,
        rate_bps: RATE_BPS,
        tenure_days: 365,
        issuer_address: "0xissuer".into(),
        start_ms: START_MS,
        total_supply_tenths,
    }
}

impl Harness {
    pub fn issue(&self, total_supply_tenths: u64) -> BondSeries {
        market::issue_series(&self.platform, terms(total_supply_tenths)).unwrap()
    }

    /// Provisions a wallet for `user_id` and returns its address.
    pub fn user(&self, user_id: &str) -> String {
        self.platform
            .vault
            .provision(self.platform.wallets.as_ref(), user_id)
            .unwrap()
            .address
    }

    pub fn buy(&self, user_id: &str, series: &BondSeries, units_tenths: u64) {
        market::buy_primary(&self.platform, user_id, &series.id, units_tenths).unwrap();
    }

    pub fn list(&self, user_id: &str, series: &BondSeries, units_tenths: u64) -> Listing {
        market::list_for_sale(&self.platform, user_id, &series.id, units_tenths).unwrap()
    }
}
