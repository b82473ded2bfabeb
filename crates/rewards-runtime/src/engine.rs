//! Engine gateway: typed messages to and from the ledger engine.
//!
//! The engine is reached over two unbounded queues. Requests flow out,
//! callbacks flow in. When either side needs an answer it embeds a
//! `oneshot` sender in the message, so the queues never assume call/return
//! symmetry.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::types::*;
use rewards_core::{EngineEnv, Error, LedgerResult, Result, RewardsCategory};
use rewards_store::{
    ActivityInfoFilter, BlobLoad, ContributionInfo, PendingContribution, PublisherInfo,
    PublisherPage, RecurringDonation, StateBlob, TipRecord,
};

/// Requests sent to the engine.
#[derive(Debug)]
pub enum EngineRequest {
    Initialize,
    SetEnvironment(EngineEnv),
    CreateWallet,
    FetchWalletProperties,
    FetchGrants { lang: String, payment_id: String },
    GetGrantCaptcha,
    SolveGrantCaptcha { solution: String },
    RecoverWallet { passphrase: String },
    Donate { publisher_id: String, amount: f64, recurring: bool },
    Reconcile { category: RewardsCategory },
    ExcludePublisher { publisher_id: String },
    RestorePublishers,
    SetPublisherPreferences(PublisherPreferences),
    SetRewardsMainEnabled(bool),
    SetContributionAutoInclude { publisher_id: String, excluded: bool, window_id: u64 },
    GetPublisherActivityFromUrl { window_id: u64, url: String, favicon_url: String },
    TabEvent(TabEvent),
    OnTimerFired { timer_id: u32 },
    OnConfirmationsTimerFired { timer_id: u32 },

    // Queries answered through the embedded sender.
    GetWalletPassphrase { reply: oneshot::Sender<String> },
    GetReconcileStamp { reply: oneshot::Sender<u64> },
    GetBootStamp { reply: oneshot::Sender<u64> },
    GetAddresses { reply: oneshot::Sender<HashMap<String, String>> },
    IsWalletCreated { reply: oneshot::Sender<bool> },
    HasSufficientBalanceToReconcile { reply: oneshot::Sender<bool> },
    GetAutoContributeProps { reply: oneshot::Sender<AutoContributeProps> },
    GetContributionAmount { reply: oneshot::Sender<f64> },
    GetPublisherBanner { publisher_id: String, reply: oneshot::Sender<Option<PublisherBanner>> },
}

impl EngineRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "Initialize",
            Self::SetEnvironment(_) => "SetEnvironment",
            Self::CreateWallet => "CreateWallet",
            Self::FetchWalletProperties => "FetchWalletProperties",
            Self::FetchGrants { .. } => "FetchGrants",
            Self::GetGrantCaptcha => "GetGrantCaptcha",
            Self::SolveGrantCaptcha { .. } => "SolveGrantCaptcha",
            Self::RecoverWallet { .. } => "RecoverWallet",
            Self::Donate { .. } => "Donate",
            Self::Reconcile { .. } => "Reconcile",
            Self::ExcludePublisher { .. } => "ExcludePublisher",
            Self::RestorePublishers => "RestorePublishers",
            Self::SetPublisherPreferences(_) => "SetPublisherPreferences",
            Self::SetRewardsMainEnabled(_) => "SetRewardsMainEnabled",
            Self::SetContributionAutoInclude { .. } => "SetContributionAutoInclude",
            Self::GetPublisherActivityFromUrl { .. } => "GetPublisherActivityFromUrl",
            Self::TabEvent(_) => "TabEvent",
            Self::OnTimerFired { .. } => "OnTimerFired",
            Self::OnConfirmationsTimerFired { .. } => "OnConfirmationsTimerFired",
            Self::GetWalletPassphrase { .. } => "GetWalletPassphrase",
            Self::GetReconcileStamp { .. } => "GetReconcileStamp",
            Self::GetBootStamp { .. } => "GetBootStamp",
            Self::GetAddresses { .. } => "GetAddresses",
            Self::IsWalletCreated { .. } => "IsWalletCreated",
            Self::HasSufficientBalanceToReconcile { .. } => "HasSufficientBalanceToReconcile",
            Self::GetAutoContributeProps { .. } => "GetAutoContributeProps",
            Self::GetContributionAmount { .. } => "GetContributionAmount",
            Self::GetPublisherBanner { .. } => "GetPublisherBanner",
        }
    }
}

/// Which timer registry a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerNamespace {
    Ledger,
    Confirmations,
}

/// Calls the engine makes into the service, plus its event notifications.
#[derive(Debug)]
pub enum EngineCallback {
    // State persistence
    LoadState { blob: StateBlob, reply: oneshot::Sender<BlobLoad> },
    SaveState { blob: StateBlob, data: String, reply: oneshot::Sender<bool> },
    ResetState { blob: StateBlob, reply: oneshot::Sender<bool> },
    LoadConfirmationsState { name: String, reply: oneshot::Sender<BlobLoad> },
    SaveConfirmationsState { name: String, value: String, reply: oneshot::Sender<bool> },
    ResetConfirmationsState { name: String, reply: oneshot::Sender<bool> },
    SetConfirmationsIsReady(bool),

    // Network and timers
    LoadUrl { request: UrlRequest, reply: oneshot::Sender<UrlResponse> },
    SetTimer { namespace: TimerNamespace, offset_secs: u64, reply: oneshot::Sender<u32> },
    KillTimer { namespace: TimerNamespace, timer_id: u32 },
    /// Fetch a publisher favicon; answers `(success, favicon_key)`.
    FetchFavIcon { url: String, favicon_key: String, reply: oneshot::Sender<(bool, String)> },

    // Utilities
    GenerateGuid { reply: oneshot::Sender<String> },
    Log { level: LogLevel, file: String, line: u32, message: String },

    // Publisher store
    SavePublisherInfo { info: PublisherInfo, reply: oneshot::Sender<LedgerResult> },
    LoadPublisherInfo {
        publisher_id: String,
        reply: oneshot::Sender<(LedgerResult, Option<PublisherInfo>)>,
    },
    SaveActivityInfo { info: PublisherInfo, reply: oneshot::Sender<LedgerResult> },
    LoadActivityInfo {
        filter: ActivityInfoFilter,
        reply: oneshot::Sender<(LedgerResult, Option<PublisherInfo>)>,
    },
    LoadPanelPublisherInfo {
        publisher_id: String,
        reconcile_stamp: u64,
        reply: oneshot::Sender<(LedgerResult, Option<PublisherInfo>)>,
    },
    SaveMediaPublisherInfo { media_key: String, publisher_id: String },
    LoadMediaPublisherInfo {
        media_key: String,
        reply: oneshot::Sender<(LedgerResult, Option<PublisherInfo>)>,
    },
    GetActivityInfoList {
        start: u32,
        limit: u32,
        filter: ActivityInfoFilter,
        reply: oneshot::Sender<(LedgerResult, PublisherPage)>,
    },
    GetRecurringDonations { reply: oneshot::Sender<(LedgerResult, Vec<RecurringDonation>)> },
    GetOneTimeTips { reply: oneshot::Sender<(LedgerResult, Vec<TipRecord>)> },
    RemoveRecurring { publisher_id: String, reply: oneshot::Sender<LedgerResult> },
    OnRestorePublishers { reply: oneshot::Sender<LedgerResult> },
    SavePendingContributions {
        list: Vec<PendingContribution>,
        reply: oneshot::Sender<LedgerResult>,
    },
    SaveContributionInfo(ContributionInfo),

    // Event notifications
    OnWalletInitialized(LedgerResult),
    OnWalletProperties(LedgerResult, Option<WalletInfo>),
    OnGrant(LedgerResult, Grant),
    OnGrantCaptcha { image: String, hint: String },
    OnRecoverWallet { result: LedgerResult, balance: f64, grants: Vec<Grant> },
    OnReconcileComplete { result: LedgerResult, outcome: ReconcileOutcome },
    OnGrantFinish(LedgerResult, Grant),
    OnPublisherActivity { result: LedgerResult, info: Option<PublisherInfo>, window_id: u64 },
    OnExcludedSitesChanged { publisher_id: String, excluded: bool },
}

/// The service's end of the engine link.
pub struct EngineChannel {
    pub requests: mpsc::UnboundedSender<EngineRequest>,
    pub callbacks: mpsc::UnboundedReceiver<EngineCallback>,
}

/// The engine's end of the link, used by transports and by tests.
pub struct EnginePeer {
    pub requests: mpsc::UnboundedReceiver<EngineRequest>,
    pub callbacks: mpsc::UnboundedSender<EngineCallback>,
}

/// Create a connected channel pair.
pub fn engine_channel() -> (EngineChannel, EnginePeer) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (cb_tx, cb_rx) = mpsc::unbounded_channel();
    (
        EngineChannel {
            requests: req_tx,
            callbacks: cb_rx,
        },
        EnginePeer {
            requests: req_rx,
            callbacks: cb_tx,
        },
    )
}

/// Outbound half of the engine link, with connection tracking.
///
/// Once the link is observed closed the gateway stays disconnected and every
/// send fails fast with `Error::NotConnected`.
pub struct EngineGateway {
    requests: mpsc::UnboundedSender<EngineRequest>,
    callbacks: mpsc::UnboundedReceiver<EngineCallback>,
    connected: bool,
}

impl EngineGateway {
    pub fn new(channel: EngineChannel) -> Self {
        Self {
            requests: channel.requests,
            callbacks: channel.callbacks,
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn mark_disconnected(&mut self) {
        if self.connected {
            warn!("Engine channel closed");
        }
        self.connected = false;
        self.callbacks.close();
    }

    /// Next inbound callback; `None` means the engine went away.
    pub async fn next_callback(&mut self) -> Option<EngineCallback> {
        self.callbacks.recv().await
    }

    /// Fire-and-forget send.
    pub fn send(&mut self, request: EngineRequest) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let name = request.name();
        debug!("-> engine {}", name);
        if self.requests.send(request).is_err() {
            self.mark_disconnected();
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Send a query and hand back the receiver for its answer.
    pub fn query<T>(
        &mut self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<oneshot::Receiver<T>> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        Ok(rx)
    }

    // ---------------------------------------------------------------
    // Typed operations
    // ---------------------------------------------------------------

    pub fn initialize(&mut self, env: &EngineEnv) -> Result<()> {
        self.send(EngineRequest::SetEnvironment(env.clone()))?;
        self.send(EngineRequest::Initialize)
    }

    pub fn create_wallet(&mut self) -> Result<()> {
        self.send(EngineRequest::CreateWallet)
    }

    pub fn fetch_wallet_properties(&mut self) -> Result<()> {
        self.send(EngineRequest::FetchWalletProperties)
    }

    pub fn fetch_grants(&mut self, lang: &str, payment_id: &str) -> Result<()> {
        self.send(EngineRequest::FetchGrants {
            lang: lang.to_string(),
            payment_id: payment_id.to_string(),
        })
    }

    pub fn get_grant_captcha(&mut self) -> Result<()> {
        self.send(EngineRequest::GetGrantCaptcha)
    }

    pub fn solve_grant_captcha(&mut self, solution: &str) -> Result<()> {
        self.send(EngineRequest::SolveGrantCaptcha {
            solution: solution.to_string(),
        })
    }

    pub fn recover_wallet(&mut self, passphrase: &str) -> Result<()> {
        self.send(EngineRequest::RecoverWallet {
            passphrase: passphrase.to_string(),
        })
    }

    pub fn donate(&mut self, publisher_id: &str, amount: f64, recurring: bool) -> Result<()> {
        self.send(EngineRequest::Donate {
            publisher_id: publisher_id.to_string(),
            amount,
            recurring,
        })
    }

    pub fn reconcile(&mut self, category: RewardsCategory) -> Result<()> {
        self.send(EngineRequest::Reconcile { category })
    }

    pub fn exclude_publisher(&mut self, publisher_id: &str) -> Result<()> {
        self.send(EngineRequest::ExcludePublisher {
            publisher_id: publisher_id.to_string(),
        })
    }

    pub fn restore_publishers(&mut self) -> Result<()> {
        self.send(EngineRequest::RestorePublishers)
    }

    pub fn set_publisher_preferences(&mut self, prefs: PublisherPreferences) -> Result<()> {
        self.send(EngineRequest::SetPublisherPreferences(prefs))
    }

    pub fn set_rewards_main_enabled(&mut self, enabled: bool) -> Result<()> {
        self.send(EngineRequest::SetRewardsMainEnabled(enabled))
    }

    pub fn set_contribution_auto_include(
        &mut self,
        publisher_id: &str,
        excluded: bool,
        window_id: u64,
    ) -> Result<()> {
        self.send(EngineRequest::SetContributionAutoInclude {
            publisher_id: publisher_id.to_string(),
            excluded,
            window_id,
        })
    }

    pub fn timer_fired(&mut self, namespace: TimerNamespace, timer_id: u32) -> Result<()> {
        match namespace {
            TimerNamespace::Ledger => self.send(EngineRequest::OnTimerFired { timer_id }),
            TimerNamespace::Confirmations => {
                self.send(EngineRequest::OnConfirmationsTimerFired { timer_id })
            }
        }
    }
}
