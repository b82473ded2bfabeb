//! Host-facing handle to a running [`RewardsService`](crate::RewardsService).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::observer::{ObserverList, RewardsObserver};
use crate::types::*;
use rewards_core::{Error, Probi, Result, RewardsCategory};
use rewards_store::{ActivityInfoFilter, BalanceReport, PublisherInfo, PublisherPage, RecurringDonation};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Host requests processed by the service loop.
pub(crate) enum Command {
    CreateWallet(Reply<()>),
    FetchWalletProperties(Reply<()>),
    FetchGrants { lang: String, payment_id: String, reply: Reply<()> },
    GetGrantCaptcha(Reply<()>),
    SolveGrantCaptcha { solution: String, reply: Reply<()> },
    RecoverWallet { passphrase: String, reply: Reply<()> },
    Donate {
        publisher_id: String,
        amount: f64,
        recurring: bool,
        site: Option<PublisherInfo>,
        reply: Reply<()>,
    },
    Reconcile { category: RewardsCategory, reply: Reply<()> },
    ExcludePublisher { publisher_id: String, reply: Reply<()> },
    RestorePublishers(Reply<()>),
    SetPublisherPreferences { prefs: PublisherPreferences, reply: Reply<()> },
    GetPublisherActivityFromUrl {
        window_id: u64,
        url: String,
        favicon_url: String,
        reply: Reply<()>,
    },
    TabEvent { event: TabEvent, reply: Reply<()> },
    SetRewardsMainEnabled { enabled: bool, reply: Reply<()> },
    GetRewardsMainEnabled(Reply<bool>),
    SetContributionAutoInclude {
        publisher_id: String,
        excluded: bool,
        window_id: u64,
        reply: Reply<()>,
    },
    UpdateTipsList(Reply<()>),

    GetWalletPassphrase(Reply<String>),
    IsWalletCreated(Reply<bool>),
    GetReconcileStamp(Reply<u64>),
    GetAddresses(Reply<HashMap<String, String>>),
    GetAutoContributeProps(Reply<AutoContributeProps>),
    GetContributionAmount(Reply<f64>),
    GetPublisherBanner { publisher_id: String, reply: Reply<Option<PublisherBanner>> },

    GetCurrentBalanceReport(Reply<BalanceReport>),
    GetAllBalanceReports(Reply<Vec<BalanceReport>>),
    GetActivityList {
        start: u32,
        limit: u32,
        filter: ActivityInfoFilter,
        reply: Reply<PublisherPage>,
    },
    GetRecurringDonations(Reply<Vec<RecurringDonation>>),
    RemoveRecurring { publisher_id: String, reply: Reply<()> },
    GetPendingContributionsTotal(Reply<Probi>),
    ClearPendingContributions(Reply<usize>),
    GetNumExcludedSites(Reply<u32>),

    GetNotifications(Reply<Vec<Notification>>),
    DeleteNotification { id: String, reply: Reply<bool> },
    SetBackupCompleted(Reply<()>),

    Shutdown(oneshot::Sender<()>),
}

impl Command {
    /// Answer the command with `Error::NotConnected` without running it.
    pub(crate) fn reject(self) {
        use Command::*;
        match self {
            CreateWallet(r)
            | FetchWalletProperties(r)
            | GetGrantCaptcha(r)
            | RestorePublishers(r)
            | SetBackupCompleted(r)
            | FetchGrants { reply: r, .. }
            | SolveGrantCaptcha { reply: r, .. }
            | RecoverWallet { reply: r, .. }
            | Donate { reply: r, .. }
            | Reconcile { reply: r, .. }
            | ExcludePublisher { reply: r, .. }
            | SetPublisherPreferences { reply: r, .. }
            | GetPublisherActivityFromUrl { reply: r, .. }
            | TabEvent { reply: r, .. }
            | SetRewardsMainEnabled { reply: r, .. }
            | SetContributionAutoInclude { reply: r, .. }
            | UpdateTipsList(r)
            | RemoveRecurring { reply: r, .. } => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetWalletPassphrase(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            IsWalletCreated(r) | GetRewardsMainEnabled(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetReconcileStamp(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetAddresses(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetAutoContributeProps(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetContributionAmount(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetPublisherBanner { reply, .. } => {
                let _ = reply.send(Err(Error::NotConnected));
            }
            GetCurrentBalanceReport(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetAllBalanceReports(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetActivityList { reply, .. } => {
                let _ = reply.send(Err(Error::NotConnected));
            }
            GetRecurringDonations(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetPendingContributionsTotal(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            ClearPendingContributions(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetNumExcludedSites(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            GetNotifications(r) => {
                let _ = r.send(Err(Error::NotConnected));
            }
            DeleteNotification { reply, .. } => {
                let _ = reply.send(Err(Error::NotConnected));
            }
            Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// State the handle can read without a round trip through the loop.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) wallet: RwLock<Option<WalletInfo>>,
    pub(crate) confirmations_ready: AtomicBool,
}

/// Cloneable host API. Every async method resolves once the service has
/// accepted (or rejected) the request; results of engine work arrive later
/// through observers.
#[derive(Clone)]
pub struct RewardsHandle {
    commands: mpsc::UnboundedSender<Command>,
    observers: ObserverList,
    shared: Arc<Shared>,
}

impl RewardsHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        observers: ObserverList,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            commands,
            observers,
            shared,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    // ---------------------------------------------------------------
    // Observers and cached state
    // ---------------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn RewardsObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn RewardsObserver>) -> bool {
        self.observers.remove(observer)
    }

    /// Last wallet snapshot reported by the engine.
    pub fn wallet_info(&self) -> Option<WalletInfo> {
        self.shared.wallet.read().clone()
    }

    pub fn confirmations_ready(&self) -> bool {
        self.shared.confirmations_ready.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------
    // Wallet and grants
    // ---------------------------------------------------------------

    pub async fn create_wallet(&self) -> Result<()> {
        self.call(Command::CreateWallet).await
    }

    pub async fn fetch_wallet_properties(&self) -> Result<()> {
        self.call(Command::FetchWalletProperties).await
    }

    pub async fn fetch_grants(&self, lang: &str, payment_id: &str) -> Result<()> {
        self.call(|reply| Command::FetchGrants {
            lang: lang.to_string(),
            payment_id: payment_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_grant_captcha(&self) -> Result<()> {
        self.call(Command::GetGrantCaptcha).await
    }

    pub async fn solve_grant_captcha(&self, solution: &str) -> Result<()> {
        self.call(|reply| Command::SolveGrantCaptcha {
            solution: solution.to_string(),
            reply,
        })
        .await
    }

    pub async fn recover_wallet(&self, passphrase: &str) -> Result<()> {
        self.call(|reply| Command::RecoverWallet {
            passphrase: passphrase.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_wallet_passphrase(&self) -> Result<String> {
        self.call(Command::GetWalletPassphrase).await
    }

    pub async fn is_wallet_created(&self) -> Result<bool> {
        self.call(Command::IsWalletCreated).await
    }

    pub async fn get_reconcile_stamp(&self) -> Result<u64> {
        self.call(Command::GetReconcileStamp).await
    }

    pub async fn get_addresses(&self) -> Result<HashMap<String, String>> {
        self.call(Command::GetAddresses).await
    }

    // ---------------------------------------------------------------
    // Main switch and auto-contribute settings
    // ---------------------------------------------------------------

    /// Turn rewards on or off. Reminder timers follow the switch and the
    /// choice is persisted.
    pub async fn set_rewards_main_enabled(&self, enabled: bool) -> Result<()> {
        self.call(|reply| Command::SetRewardsMainEnabled { enabled, reply })
            .await
    }

    pub async fn get_rewards_main_enabled(&self) -> Result<bool> {
        self.call(Command::GetRewardsMainEnabled).await
    }

    pub async fn get_auto_contribute_props(&self) -> Result<AutoContributeProps> {
        self.call(Command::GetAutoContributeProps).await
    }

    pub async fn get_auto_contribute(&self) -> Result<bool> {
        Ok(self.get_auto_contribute_props().await?.enabled_contribute)
    }

    pub async fn get_publisher_min_visit_time(&self) -> Result<u64> {
        Ok(self.get_auto_contribute_props().await?.contribution_min_time)
    }

    pub async fn get_publisher_min_visits(&self) -> Result<u32> {
        Ok(self.get_auto_contribute_props().await?.contribution_min_visits)
    }

    pub async fn get_publisher_allow_non_verified(&self) -> Result<bool> {
        Ok(self.get_auto_contribute_props().await?.contribution_non_verified)
    }

    pub async fn get_publisher_allow_videos(&self) -> Result<bool> {
        Ok(self.get_auto_contribute_props().await?.contribution_videos)
    }

    /// Monthly auto-contribute amount in BAT.
    pub async fn get_contribution_amount(&self) -> Result<f64> {
        self.call(Command::GetContributionAmount).await
    }

    // ---------------------------------------------------------------
    // Contributions
    // ---------------------------------------------------------------

    /// Tip a publisher. `site` carries publisher details known to the host
    /// and is merged into the stored record.
    pub async fn donate(
        &self,
        publisher_id: &str,
        amount: f64,
        recurring: bool,
        site: Option<PublisherInfo>,
    ) -> Result<()> {
        self.call(|reply| Command::Donate {
            publisher_id: publisher_id.to_string(),
            amount,
            recurring,
            site,
            reply,
        })
        .await
    }

    pub async fn reconcile(&self, category: RewardsCategory) -> Result<()> {
        self.call(|reply| Command::Reconcile { category, reply })
            .await
    }

    pub async fn get_recurring_donations(&self) -> Result<Vec<RecurringDonation>> {
        self.call(Command::GetRecurringDonations).await
    }

    pub async fn remove_recurring(&self, publisher_id: &str) -> Result<()> {
        self.call(|reply| Command::RemoveRecurring {
            publisher_id: publisher_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_pending_contributions_total(&self) -> Result<Probi> {
        self.call(Command::GetPendingContributionsTotal).await
    }

    /// Drop every pending contribution. Returns how many were removed.
    pub async fn clear_pending_contributions(&self) -> Result<usize> {
        self.call(Command::ClearPendingContributions).await
    }

    /// Reload this month's one-time tips; the list is delivered through
    /// `on_current_tips`.
    pub async fn update_tips_list(&self) -> Result<()> {
        self.call(Command::UpdateTipsList).await
    }

    pub async fn get_current_balance_report(&self) -> Result<BalanceReport> {
        self.call(Command::GetCurrentBalanceReport).await
    }

    pub async fn get_all_balance_reports(&self) -> Result<Vec<BalanceReport>> {
        self.call(Command::GetAllBalanceReports).await
    }

    // ---------------------------------------------------------------
    // Publishers
    // ---------------------------------------------------------------

    pub async fn exclude_publisher(&self, publisher_id: &str) -> Result<()> {
        self.call(|reply| Command::ExcludePublisher {
            publisher_id: publisher_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn restore_publishers(&self) -> Result<()> {
        self.call(Command::RestorePublishers).await
    }

    pub async fn get_num_excluded_sites(&self) -> Result<u32> {
        self.call(Command::GetNumExcludedSites).await
    }

    /// Include or exclude a publisher from auto-contribute.
    pub async fn set_contribution_auto_include(
        &self,
        publisher_id: &str,
        excluded: bool,
        window_id: u64,
    ) -> Result<()> {
        self.call(|reply| Command::SetContributionAutoInclude {
            publisher_id: publisher_id.to_string(),
            excluded,
            window_id,
            reply,
        })
        .await
    }

    pub async fn get_publisher_banner(&self, publisher_id: &str) -> Result<Option<PublisherBanner>> {
        self.call(|reply| Command::GetPublisherBanner {
            publisher_id: publisher_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn set_publisher_preferences(&self, prefs: PublisherPreferences) -> Result<()> {
        self.call(|reply| Command::SetPublisherPreferences { prefs, reply })
            .await
    }

    pub async fn get_activity_list(
        &self,
        start: u32,
        limit: u32,
        filter: ActivityInfoFilter,
    ) -> Result<PublisherPage> {
        self.call(|reply| Command::GetActivityList {
            start,
            limit,
            filter,
            reply,
        })
        .await
    }

    pub async fn get_publisher_activity_from_url(
        &self,
        window_id: u64,
        url: &str,
        favicon_url: &str,
    ) -> Result<()> {
        self.call(|reply| Command::GetPublisherActivityFromUrl {
            window_id,
            url: url.to_string(),
            favicon_url: favicon_url.to_string(),
            reply,
        })
        .await
    }

    pub async fn on_tab_event(&self, event: TabEvent) -> Result<()> {
        self.call(|reply| Command::TabEvent { event, reply }).await
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    pub async fn get_notifications(&self) -> Result<Vec<Notification>> {
        self.call(Command::GetNotifications).await
    }

    /// Dismiss a notification. Returns false for unknown ids.
    pub async fn delete_notification(&self, id: &str) -> Result<bool> {
        self.call(|reply| Command::DeleteNotification {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn set_backup_completed(&self) -> Result<()> {
        self.call(Command::SetBackupCompleted).await
    }

    /// Stop the service. Pending timers are cancelled and in-flight fetches
    /// abandoned. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
