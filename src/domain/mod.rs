//! Core domain types and logic.

pub mod bond;
pub mod chain;
pub mod config_validation;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod market;
pub mod negotiation;
pub mod platform;
pub mod pricing;
pub mod sponsorship;
pub mod units;
pub mod vault;
