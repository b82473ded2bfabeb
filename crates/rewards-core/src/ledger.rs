//! Ledger vocabulary shared by the store and the runtime.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Result code reported by the ledger engine for a business operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerResult {
    Ok,
    Error,
    NoLedgerState,
    NoPublisherState,
    NoPublisherList,
    InvalidPublisherState,
    InvalidLedgerState,
    CaptchaFailed,
    NotFound,
    TooManyResults,
    WalletCreated,
    GrantNotFound,
    GrantAlreadyClaimed,
    InsufficientBalance,
}

impl LedgerResult {
    /// `Ok` and `WalletCreated` both count as success.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::WalletCreated)
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Ok
        } else {
            Self::Error
        }
    }
}

/// Contribution category. Discriminants match the engine's wire values.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RewardsCategory {
    #[default]
    AutoContribute = 2,
    OneTimeTip = 8,
    RecurringTip = 16,
    /// Grant credits; only used for balance-report bookkeeping.
    Promotion = 32,
}

impl RewardsCategory {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            2 => Some(Self::AutoContribute),
            8 => Some(Self::OneTimeTip),
            16 => Some(Self::RecurringTip),
            32 => Some(Self::Promotion),
            _ => None,
        }
    }

    pub fn all() -> &'static [RewardsCategory] {
        &[
            Self::AutoContribute,
            Self::OneTimeTip,
            Self::RecurringTip,
            Self::Promotion,
        ]
    }
}

impl fmt::Display for RewardsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoContribute => write!(f, "auto-contribute"),
            Self::OneTimeTip => write!(f, "one-time-tip"),
            Self::RecurringTip => write!(f, "recurring"),
            Self::Promotion => write!(f, "promotion"),
        }
    }
}

impl FromStr for RewardsCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto-contribute" | "auto_contribute" => Ok(Self::AutoContribute),
            "one-time-tip" | "one_time_tip" | "tip" => Ok(Self::OneTimeTip),
            "recurring" | "recurring-tip" | "recurring_tip" => Ok(Self::RecurringTip),
            "promotion" | "grant" => Ok(Self::Promotion),
            other => Err(Error::Config(format!("unknown category: {}", other))),
        }
    }
}

/// Amount in probi (10^-18 BAT), carried on the wire as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Probi(pub u128);

impl Probi {
    pub const ZERO: Probi = Probi(0);

    pub fn checked_add(self, other: Probi) -> Option<Probi> {
        self.0.checked_add(other.0).map(Probi)
    }

    /// Parse, treating an empty string as zero.
    pub fn parse_lenient(s: &str) -> Result<Probi> {
        if s.trim().is_empty() {
            return Ok(Probi::ZERO);
        }
        s.parse()
    }
}

impl fmt::Display for Probi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Probi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u128>()
            .map(Probi)
            .map_err(|e| Error::InvalidState(format!("invalid probi '{}': {}", s, e)))
    }
}

impl Serialize for Probi {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Probi {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Probi::parse_lenient(&s).map_err(serde::de::Error::custom)
    }
}

/// A (month, year) reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(time: DateTime<Utc>) -> Self {
        Self {
            year: time.year(),
            month: time.month(),
        }
    }

    pub fn current() -> Self {
        Self::of(Utc::now())
    }

    /// Report key used by the host, e.g. `2026_10`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.year, self.month)
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
