//! Fungible token ledger with an automatic per-transfer fee split.
//!
//! Every transfer is decomposed into a fee leg and a net leg. The fee goes
//! to the sender's referrer when one is registered, otherwise to the ledger
//! owner (the beneficiary):
//!
//! * [`ledger`]: addresses, amounts and the balance map.
//! * [`fees`]: fixed-point fee arithmetic and the bounded rate schedule.
//! * [`referral`]: write-once referrer assignments.
//! * [`allowance`]: delegated spending quotas.
//! * [`engine`]: [`TokenLedger`], the transfer orchestrator and the
//!   owner-gated administration calls.
//! * [`config`] and [`store`]: TOML construction parameters and JSON state
//!   files with an integrity root.

pub mod allowance;
pub mod config;
pub mod engine;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod referral;
pub mod store;

mod error;

pub use config::{ConfigError, LedgerConfig, TokenMetadata};
pub use engine::{TokenLedger, TransferQuote, TransferReceipt};
pub use error::{LedgerError, LedgerResult};
pub use events::{LedgerEvent, TransferLeg};
pub use fees::{compute_fee, FeeKind, FeeSchedule, MAX_FEE_RATE, RATE_DENOMINATOR};
pub use ledger::{Address, Amount};
pub use store::{LedgerSnapshot, StateFile, StateLock, StoreError};
