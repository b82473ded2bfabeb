//! Host-side observers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::types::*;
use rewards_core::{LedgerResult, Probi, RewardsCategory};
use rewards_store::{BalanceReport, PublisherInfo, RecurringDonation, TipRecord};

/// Publisher id used in `on_excluded_sites_changed` when every exclusion
/// was cleared at once.
pub const ALL_EXCLUDED_SITES: &str = "-1";

/// Listener for rewards events. Every method defaults to a no-op.
pub trait RewardsObserver: Send + Sync {
    fn on_wallet_initialized(&self, _result: LedgerResult) {}
    fn on_wallet_properties(&self, _result: LedgerResult, _wallet: Option<&WalletInfo>) {}
    fn on_grant(&self, _result: LedgerResult, _grant: &Grant) {}
    fn on_grant_captcha(&self, _image: &str, _hint: &str) {}
    fn on_recover_wallet(&self, _result: LedgerResult, _balance: f64, _grants: &[Grant]) {}
    fn on_reconcile_complete(
        &self,
        _result: LedgerResult,
        _viewing_id: &str,
        _category: RewardsCategory,
        _probi: Probi,
    ) {
    }
    fn on_grant_finish(&self, _result: LedgerResult, _grant: &Grant) {}
    fn on_publisher_activity(
        &self,
        _result: LedgerResult,
        _info: Option<&PublisherInfo>,
        _window_id: u64,
    ) {
    }
    fn on_excluded_sites_changed(&self, _publisher_id: &str, _excluded: bool) {}
    fn on_recurring_donation_updated(&self, _list: &[RecurringDonation]) {}
    fn on_current_balance_report(&self, _report: &BalanceReport) {}
    fn on_content_site_updated(&self, _site: &ContentSite) {}
    fn on_notification_added(&self, _notification: &Notification) {}
    fn on_notification_deleted(&self, _notification: &Notification) {}
    fn on_rewards_main_enabled(&self, _enabled: bool) {}
    /// One-time tips made this month.
    fn on_current_tips(&self, _tips: &[TipRecord]) {}
}

/// Registered observers, shared between the service and its handles.
#[derive(Clone, Default)]
pub struct ObserverList {
    observers: Arc<RwLock<Vec<Arc<dyn RewardsObserver>>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn RewardsObserver>) {
        self.observers.write().push(observer);
    }

    /// Remove by identity. Returns false if it was not registered.
    pub fn remove(&self, observer: &Arc<dyn RewardsObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver to every observer in registration order. A panicking observer
    /// is logged and skipped.
    pub fn notify(&self, event: &str, f: impl Fn(&dyn RewardsObserver)) {
        let snapshot: Vec<Arc<dyn RewardsObserver>> = self.observers.read().clone();
        for (index, observer) in snapshot.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                error!("Observer {} panicked handling {}", index, event);
            }
        }
    }
}
