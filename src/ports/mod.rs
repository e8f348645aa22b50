//! Port traits: the seams between domain logic and the outside world.

pub mod chain_port;
pub mod clock_port;
pub mod config_port;
pub mod ledger_port;
pub mod wallet_port;
