//! Rewards Core: error type, configuration, shared ledger vocabulary.

pub mod config;
pub mod error;
pub mod ledger;

pub use config::{DataPaths, EngineEnv, NotificationSettings, RewardsConfig};
pub use error::{Error, Result};
pub use ledger::{now_secs, LedgerResult, Period, Probi, RewardsCategory};
