//! Runtime types exchanged with the engine and the host.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use rewards_core::{Probi, RewardsCategory};
use rewards_store::PublisherInfo;

/// Cached wallet snapshot. The engine owns the real thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Currency code -> deposit address.
    pub addresses: HashMap<String, String>,
    pub balance: f64,
    /// Currency code -> exchange rate.
    pub rates: HashMap<String, f64>,
    pub probi: Probi,
    /// Monthly contribution amounts offered to the user.
    pub choices: Vec<f64>,
    pub fee_amount: f64,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub promotion_id: String,
    pub alt_currency: String,
    pub probi: Probi,
    /// Unix seconds.
    pub expiry_time: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Lifecycle of a single grant. Ordered; a grant only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantPhase {
    Fetched,
    CaptchaPending,
    Solved,
    Finished,
}

impl GrantPhase {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: GrantPhase) -> bool {
        next >= self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UrlMethod {
    #[default]
    Get,
    Put,
    Post,
}

impl std::fmt::Display for UrlMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Put => write!(f, "PUT"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// An HTTP-like request issued by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    /// Raw `"Name: value"` header lines.
    pub headers: Vec<String>,
    pub body: String,
    pub content_type: String,
    pub method: UrlMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlResponse {
    /// HTTP status, or -1 when the request never produced one.
    pub status: i32,
    pub body: String,
    /// Lowercased header name -> value.
    pub headers: BTreeMap<String, String>,
}

impl UrlResponse {
    pub fn transport_error() -> Self {
        Self {
            status: -1,
            ..Default::default()
        }
    }
}

/// Publisher as presented to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSite {
    pub id: String,
    pub name: String,
    pub url: String,
    pub provider: String,
    pub favicon_url: String,
    pub verified: bool,
    pub excluded: bool,
    pub percentage: u32,
    pub weight: f64,
    pub reconcile_stamp: u64,
}

impl From<&PublisherInfo> for ContentSite {
    fn from(info: &PublisherInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            url: info.url.clone(),
            provider: info.provider.clone(),
            favicon_url: info.favicon_url.clone(),
            verified: info.verified,
            excluded: info.excluded,
            percentage: info.percent,
            weight: info.weight,
            reconcile_stamp: info.reconcile_stamp,
        }
    }
}

/// Auto-contribute settings as the engine currently holds them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoContributeProps {
    pub enabled_contribute: bool,
    /// Seconds a visit must last to count.
    pub contribution_min_time: u64,
    pub contribution_min_visits: u32,
    pub contribution_non_verified: bool,
    pub contribution_videos: bool,
    pub reconcile_stamp: u64,
}

/// Tip banner a publisher configured for its site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherBanner {
    pub publisher_key: String,
    pub title: String,
    pub name: String,
    pub description: String,
    pub background: String,
    pub logo: String,
    /// Suggested tip amounts in BAT.
    pub amounts: Vec<u32>,
    /// Network name -> profile URL.
    pub social: BTreeMap<String, String>,
    pub verified: bool,
}

/// Auto-contribute preferences forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherPreferences {
    /// Seconds a visit must last to count.
    pub min_visit_time: u64,
    pub min_visits: u32,
    pub allow_non_verified: bool,
    pub allow_videos: bool,
    /// Monthly auto-contribute amount in BAT.
    pub contribution_amount: f64,
    pub auto_contribute: bool,
}

impl Default for PublisherPreferences {
    fn default() -> Self {
        Self {
            min_visit_time: 8,
            min_visits: 1,
            allow_non_verified: true,
            allow_videos: true,
            contribution_amount: 0.0,
            auto_contribute: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BackupWallet,
    InsufficientFunds,
    GrantAvailable,
}

/// A host-visible prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    /// Unix seconds when it was raised.
    pub timestamp: u64,
    pub args: Vec<String>,
}

/// Browsing events the engine uses for activity tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabEventKind {
    Load { url: String },
    Unload,
    Show,
    Hide,
    Foreground,
    Background,
    MediaStart,
    MediaStop,
    XhrLoad {
        url: String,
        first_party_url: String,
        referrer: String,
    },
    PostData {
        url: String,
        first_party_url: String,
        referrer: String,
        post_data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabEvent {
    pub tab_id: u32,
    pub kind: TabEventKind,
}

/// One (publisher, amount) leg of a settled reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileDirection {
    pub publisher_id: String,
    pub probi: Probi,
}

/// Engine log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Response,
    Request,
}

/// Settled reconcile as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub viewing_id: String,
    pub category: RewardsCategory,
    pub probi: Probi,
    pub directions: Vec<ReconcileDirection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_phase_only_forward() {
        assert!(GrantPhase::Fetched.can_advance_to(GrantPhase::CaptchaPending));
        assert!(GrantPhase::Fetched.can_advance_to(GrantPhase::Finished));
        assert!(GrantPhase::Solved.can_advance_to(GrantPhase::Solved));
        assert!(!GrantPhase::Solved.can_advance_to(GrantPhase::CaptchaPending));
        assert!(!GrantPhase::Finished.can_advance_to(GrantPhase::Fetched));
    }

    #[test]
    fn test_content_site_from_publisher() {
        let mut info = PublisherInfo::new("example.com");
        info.percent = 40;
        info.verified = true;
        let site = ContentSite::from(&info);
        assert_eq!(site.id, "example.com");
        assert_eq!(site.percentage, 40);
        assert!(site.verified);
    }

    #[test]
    fn test_transport_error_response() {
        let r = UrlResponse::transport_error();
        assert_eq!(r.status, -1);
        assert!(r.body.is_empty());
        assert!(r.headers.is_empty());
    }
}
