//! Record types for publishers, contributions, and balance reports.

use serde::{Deserialize, Serialize};

use rewards_core::{Period, Probi, RewardsCategory};

/// A publisher together with its activity for one reconcile period.
///
/// Identity fields (`name` .. `excluded`) live in `publisher_info`;
/// the rest comes from `activity_info` and is zero when no activity row
/// was joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub provider: String,
    pub favicon_url: String,
    pub verified: bool,
    pub excluded: bool,
    /// Accumulated visit time in seconds.
    pub duration: u64,
    pub visits: u32,
    pub score: f64,
    pub percent: u32,
    pub weight: f64,
    pub reconcile_stamp: u64,
    /// Unix seconds of the most recent visit.
    pub last_visit: u64,
    /// Category the activity counts toward.
    pub category: RewardsCategory,
    /// Activity period; 0 when unknown.
    pub month: u32,
    pub year: i32,
}

impl PublisherInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Which exclusion states an activity query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExcludeFilter {
    /// Hide excluded publishers.
    #[default]
    Default,
    Excluded,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityOrder {
    Score,
    Visits,
    Recency,
    Duration,
}

impl ActivityOrder {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Score => "ai.score",
            Self::Visits => "ai.visits",
            Self::Recency => "ai.last_visit",
            Self::Duration => "ai.duration",
        }
    }
}

/// Filter for activity list queries. Zero/`None` fields do not filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityInfoFilter {
    pub publisher_id: Option<String>,
    pub reconcile_stamp: u64,
    pub min_duration: u64,
    pub min_visits: u32,
    /// Include unverified publishers.
    pub non_verified: bool,
    pub excluded: ExcludeFilter,
    /// Minimum percent share.
    pub percent: u32,
    pub visited_after: Option<u64>,
    pub visited_before: Option<u64>,
    pub category: Option<RewardsCategory>,
    pub period: Option<Period>,
    /// Sort keys applied in order; `true` = ascending.
    pub order_by: Vec<(ActivityOrder, bool)>,
}

impl Default for ActivityInfoFilter {
    fn default() -> Self {
        Self {
            publisher_id: None,
            reconcile_stamp: 0,
            min_duration: 0,
            min_visits: 0,
            non_verified: true,
            excluded: ExcludeFilter::Default,
            percent: 0,
            visited_after: None,
            visited_before: None,
            category: None,
            period: None,
            order_by: Vec::new(),
        }
    }
}

impl ActivityInfoFilter {
    pub fn for_publisher(publisher_id: impl Into<String>) -> Self {
        Self {
            publisher_id: Some(publisher_id.into()),
            excluded: ExcludeFilter::All,
            ..Default::default()
        }
    }
}

/// One page of an activity list. `next_record` is 0 once exhausted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublisherPage {
    pub items: Vec<PublisherInfo>,
    pub next_record: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringDonation {
    pub publisher_id: String,
    pub amount: f64,
    pub added_date: u64,
    /// Publisher identity, empty when the publisher was never saved.
    pub name: String,
    pub url: String,
    pub provider: String,
    pub favicon_url: String,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionInfo {
    pub publisher_id: String,
    pub probi: Probi,
    pub category: RewardsCategory,
    pub month: u32,
    pub year: i32,
    /// Unix seconds.
    pub date: u64,
}

/// A one-time tip settled in some period, with the publisher's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipRecord {
    pub publisher_id: String,
    pub probi: Probi,
    /// Unix seconds.
    pub date: u64,
    pub name: String,
    pub url: String,
    pub provider: String,
    pub favicon_url: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributionFilter {
    pub category: Option<RewardsCategory>,
    pub period: Option<Period>,
    pub publisher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingContribution {
    pub publisher_id: String,
    pub probi: Probi,
    pub category: RewardsCategory,
    pub viewing_id: String,
    pub added_date: u64,
}

/// Balance report column an amount is booked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceReportKind {
    Grant,
    AdsEarning,
    AutoContribute,
    RecurringDonation,
    OneTimeDonation,
}

impl From<RewardsCategory> for BalanceReportKind {
    fn from(category: RewardsCategory) -> Self {
        match category {
            RewardsCategory::AutoContribute => Self::AutoContribute,
            RewardsCategory::OneTimeTip => Self::OneTimeDonation,
            RewardsCategory::RecurringTip => Self::RecurringDonation,
            RewardsCategory::Promotion => Self::Grant,
        }
    }
}

/// Per-period aggregate of credits and debits, all in probi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub period: Period,
    pub grants: Probi,
    pub earning_from_ads: Probi,
    pub auto_contribute: Probi,
    pub recurring_donation: Probi,
    pub one_time_donation: Probi,
}

impl BalanceReport {
    pub fn empty(period: Period) -> Self {
        Self {
            period,
            grants: Probi::ZERO,
            earning_from_ads: Probi::ZERO,
            auto_contribute: Probi::ZERO,
            recurring_donation: Probi::ZERO,
            one_time_donation: Probi::ZERO,
        }
    }

    pub fn get(&self, kind: BalanceReportKind) -> Probi {
        match kind {
            BalanceReportKind::Grant => self.grants,
            BalanceReportKind::AdsEarning => self.earning_from_ads,
            BalanceReportKind::AutoContribute => self.auto_contribute,
            BalanceReportKind::RecurringDonation => self.recurring_donation,
            BalanceReportKind::OneTimeDonation => self.one_time_donation,
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: BalanceReportKind) -> &mut Probi {
        match kind {
            BalanceReportKind::Grant => &mut self.grants,
            BalanceReportKind::AdsEarning => &mut self.earning_from_ads,
            BalanceReportKind::AutoContribute => &mut self.auto_contribute,
            BalanceReportKind::RecurringDonation => &mut self.recurring_donation,
            BalanceReportKind::OneTimeDonation => &mut self.one_time_donation,
        }
    }
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub publishers: i64,
    pub activity_rows: i64,
    pub excluded_publishers: i64,
    pub media_publishers: i64,
    pub recurring_donations: i64,
    pub contributions: i64,
    pub pending_contributions: i64,
    pub balance_reports: i64,
    pub db_path: String,
    pub db_size_mb: f64,
}

/// One of the engine's named state blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBlob {
    Ledger,
    Publisher,
    PublisherList,
}

impl std::fmt::Display for StateBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger => write!(f, "ledger state"),
            Self::Publisher => write!(f, "publisher state"),
            Self::PublisherList => write!(f, "publisher list"),
        }
    }
}

/// Outcome of loading a named blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLoad {
    Found(String),
    NotFound,
    Failed,
}
