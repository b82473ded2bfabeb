//! The rewards service: callback router and flow sequencer.
//!
//! One tokio task owns every piece of mutable state: timer and fetch maps,
//! flow state machines, the notification policy and the media-key cache.
//! Host commands, engine callbacks, timer fires, fetch completions and
//! finished I/O all arrive as messages on that task. Store and file work is
//! queued to the [`IoWorker`]; its results come back as continuations that
//! run on the owning task.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineCallback, EngineChannel, EngineGateway, EngineRequest, TimerNamespace};
use crate::fetch::{FetchCorrelator, FetchDone, UrlFetcher};
use crate::flows::Flows;
use crate::handle::{Command, RewardsHandle, Shared};
use crate::notifications::NotificationPolicy;
use crate::observer::{ObserverList, ALL_EXCLUDED_SITES};
use crate::timers::{TimerFired, TimerRegistry};
use crate::types::*;
use crate::worker::{IoJob, IoWorker};
use rewards_core::{
    now_secs, Error, LedgerResult, Period, Probi, Result, RewardsCategory, RewardsConfig,
};
use rewards_store::{
    BalanceReport, BalanceReportKind, ContributionInfo, PublisherInfo, PublisherPage,
    PublisherStore, RecurringDonation, StateStore, TipRecord,
};

type Continuation = Box<dyn FnOnce(&mut RewardsService) + Send>;

pub struct RewardsService {
    config: RewardsConfig,
    gateway: EngineGateway,
    worker: IoWorker,
    observers: ObserverList,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,

    timers: TimerRegistry,
    confirmation_timers: TimerRegistry,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    fetches: FetchCorrelator,
    fetch_rx: mpsc::UnboundedReceiver<FetchDone>,
    continuation_tx: mpsc::UnboundedSender<Continuation>,
    continuation_rx: mpsc::UnboundedReceiver<Continuation>,

    flows: Flows,
    policy: NotificationPolicy,
    notification_task: Option<JoinHandle<()>>,
    tick_tx: mpsc::UnboundedSender<()>,
    tick_rx: mpsc::UnboundedReceiver<()>,
    media_cache: HashMap<String, String>,
}

/// Open the stores under `config.data_paths` and spawn the service task.
pub fn start(
    config: RewardsConfig,
    channel: EngineChannel,
    fetcher: Arc<dyn UrlFetcher>,
) -> Result<(RewardsHandle, JoinHandle<()>)> {
    let store = Arc::new(PublisherStore::open(&config.data_paths.publisher_info_db)?);
    let state = Arc::new(StateStore::new(&config.data_paths));
    let (service, handle) = RewardsService::new(config, channel, fetcher, store, state);
    let task = tokio::spawn(service.run());
    Ok((handle, task))
}

impl RewardsService {
    /// Build a service around already opened stores. Must be called inside
    /// a tokio runtime; the I/O worker starts immediately.
    pub fn new(
        config: RewardsConfig,
        channel: EngineChannel,
        fetcher: Arc<dyn UrlFetcher>,
        store: Arc<PublisherStore>,
        state: Arc<StateStore>,
    ) -> (Self, RewardsHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (continuation_tx, continuation_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        let observers = ObserverList::new();
        let shared = Arc::new(Shared::default());
        let policy = NotificationPolicy::load(
            config.notifications.clone(),
            config.data_paths.notification_prefs.clone(),
        );

        let service = Self {
            gateway: EngineGateway::new(channel),
            worker: IoWorker::start(store, state),
            observers: observers.clone(),
            shared: shared.clone(),
            commands: command_rx,
            timers: TimerRegistry::new(TimerNamespace::Ledger, timer_tx.clone()),
            confirmation_timers: TimerRegistry::new(TimerNamespace::Confirmations, timer_tx),
            timer_rx,
            fetches: FetchCorrelator::new(fetcher, fetch_tx),
            fetch_rx,
            continuation_tx,
            continuation_rx,
            flows: Flows::new(),
            policy,
            notification_task: None,
            tick_tx,
            tick_rx,
            media_cache: HashMap::new(),
            config,
        };
        let handle = RewardsHandle::new(command_tx, observers, shared);
        (service, handle)
    }

    /// Run until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Rewards service started (data dir {})",
            self.config.data_paths.root.display()
        );
        let env = self.config.engine_env.clone();
        if let Err(e) = self.send_engine(|g| g.initialize(&env)) {
            warn!("Engine initialization not sent: {}", e);
        }
        if self.policy.main_enabled() {
            self.start_notification_timers();
        } else {
            info!("Rewards switched off; reminder timers idle");
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                callback = self.gateway.next_callback(), if self.gateway.is_connected() => {
                    match callback {
                        Some(callback) => self.handle_callback(callback),
                        None => self.on_disconnected(),
                    }
                }
                Some(fired) = self.timer_rx.recv() => self.on_timer_fired(fired),
                Some(done) = self.fetch_rx.recv() => {
                    self.fetches.resolve(done);
                }
                Some(continuation) = self.continuation_rx.recv() => continuation(&mut self),
                Some(()) = self.tick_rx.recv() => self.evaluate_notifications(),
            }
        }
        info!("Rewards service stopped");
    }

    // ---------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------

    fn send_engine(&mut self, op: impl FnOnce(&mut EngineGateway) -> Result<()>) -> Result<()> {
        let was_connected = self.gateway.is_connected();
        let result = op(&mut self.gateway);
        if was_connected && !self.gateway.is_connected() {
            self.on_disconnected();
        }
        result
    }

    fn engine_query<T>(
        &mut self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<oneshot::Receiver<T>> {
        let was_connected = self.gateway.is_connected();
        let result = self.gateway.query(make);
        if was_connected && !self.gateway.is_connected() {
            self.on_disconnected();
        }
        result
    }

    /// Ask the engine something and continue on the owning task with the
    /// answer. Nothing runs if the engine drops the question.
    fn query_engine<T, C>(&mut self, make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest, then: C)
    where
        T: Send + 'static,
        C: FnOnce(&mut RewardsService, T) + Send + 'static,
    {
        let rx = match self.engine_query(make) {
            Ok(rx) => rx,
            Err(e) => {
                debug!("Engine query skipped: {}", e);
                return;
            }
        };
        let tx = self.continuation_tx.clone();
        tokio::spawn(async move {
            if let Ok(value) = rx.await {
                let continuation: Continuation =
                    Box::new(move |svc: &mut RewardsService| then(svc, value));
                let _ = tx.send(continuation);
            }
        });
    }

    /// Forward an engine query's answer straight to a host reply.
    fn relay_query<T: Send + 'static>(
        &mut self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
        reply: oneshot::Sender<Result<T>>,
    ) {
        match self.engine_query(make) {
            Ok(rx) => {
                tokio::spawn(async move {
                    let _ = reply.send(rx.await.map_err(|_| Error::NotConnected));
                });
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn submit(&self, job: IoJob) {
        if !self.worker.submit(job) {
            error!("I/O worker is gone; dropping job");
        }
    }

    /// Run `work` on the I/O worker, then `then` on the owning task.
    fn io<T, W, C>(&self, work: W, then: C)
    where
        T: Send + 'static,
        W: FnOnce(&PublisherStore, &StateStore) -> T + Send + 'static,
        C: FnOnce(&mut RewardsService, T) + Send + 'static,
    {
        let tx = self.continuation_tx.clone();
        self.submit(Box::new(move |store: &PublisherStore, state: &StateStore| {
            let value = work(store, state);
            let continuation: Continuation =
                Box::new(move |svc: &mut RewardsService| then(svc, value));
            let _ = tx.send(continuation);
        }));
    }

    /// Run `work` on the I/O worker and send its value to `reply`.
    fn io_reply<T, W>(&self, work: W, reply: oneshot::Sender<T>)
    where
        T: Send + 'static,
        W: FnOnce(&PublisherStore, &StateStore) -> T + Send + 'static,
    {
        self.submit(Box::new(move |store: &PublisherStore, state: &StateStore| {
            let _ = reply.send(work(store, state));
        }));
    }

    fn registry(&mut self, namespace: TimerNamespace) -> &mut TimerRegistry {
        match namespace {
            TimerNamespace::Ledger => &mut self.timers,
            TimerNamespace::Confirmations => &mut self.confirmation_timers,
        }
    }

    fn on_timer_fired(&mut self, fired: TimerFired) {
        if !self.registry(fired.namespace).take_fired(fired.timer_id) {
            debug!("Dropping fire of killed timer {}", fired.timer_id);
            return;
        }
        let _ = self.send_engine(|g| g.timer_fired(fired.namespace, fired.timer_id));
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    fn stop_io(&mut self) -> (usize, usize) {
        let timers = self.timers.cancel_all() + self.confirmation_timers.cancel_all();
        let fetches = self.fetches.abandon_all();
        self.stop_notification_timers();
        (timers, fetches)
    }

    fn shutdown(&mut self) {
        let (timers, fetches) = self.stop_io();
        info!(
            "Shutting down rewards service: cancelled {} timers, abandoned {} fetches",
            timers, fetches
        );
    }

    fn on_disconnected(&mut self) {
        self.gateway.mark_disconnected();
        let (timers, fetches) = self.stop_io();
        let aborted = self.flows.abort_pending();
        warn!(
            "Engine disconnected: cancelled {} timers, abandoned {} fetches",
            timers, fetches
        );

        if aborted.wallet {
            self.observers.notify("wallet_initialized", |o| {
                o.on_wallet_initialized(LedgerResult::Error)
            });
        }
        if aborted.grant {
            let grant = Grant::default();
            self.observers
                .notify("grant_finish", |o| o.on_grant_finish(LedgerResult::Error, &grant));
        }
        for category in aborted.reconciles {
            self.observers.notify("reconcile_complete", |o| {
                o.on_reconcile_complete(LedgerResult::Error, "", category, Probi::ZERO)
            });
        }
    }

    fn start_notification_timers(&mut self) {
        let startup = self.policy.settings().startup_delay;
        let period = self
            .policy
            .settings()
            .periodic_interval
            .max(Duration::from_secs(1));
        let tx = self.tick_tx.clone();
        self.stop_notification_timers();
        self.notification_task = Some(tokio::spawn(async move {
            tokio::time::sleep(startup).await;
            if tx.send(()).is_err() {
                return;
            }
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(()).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_notification_timers(&mut self) {
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }
    }

    // ---------------------------------------------------------------
    // Host commands
    // ---------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        if !self.gateway.is_connected() {
            command.reject();
            return;
        }

        match command {
            Command::CreateWallet(reply) => {
                let result = self
                    .flows
                    .begin_wallet()
                    .and_then(|_| self.send_engine(|g| g.create_wallet()));
                let _ = reply.send(result);
            }
            Command::FetchWalletProperties(reply) => {
                let _ = reply.send(self.send_engine(|g| g.fetch_wallet_properties()));
            }
            Command::FetchGrants {
                lang,
                payment_id,
                reply,
            } => {
                let result = self
                    .flows
                    .begin_fetch_grants()
                    .and_then(|_| self.send_engine(|g| g.fetch_grants(&lang, &payment_id)));
                let _ = reply.send(result);
            }
            Command::GetGrantCaptcha(reply) => {
                let result = self
                    .flows
                    .begin_captcha()
                    .and_then(|_| self.send_engine(|g| g.get_grant_captcha()));
                let _ = reply.send(result);
            }
            Command::SolveGrantCaptcha { solution, reply } => {
                let result = self
                    .flows
                    .begin_solve()
                    .and_then(|_| self.send_engine(|g| g.solve_grant_captcha(&solution)));
                let _ = reply.send(result);
            }
            Command::RecoverWallet { passphrase, reply } => {
                let _ = reply.send(self.send_engine(|g| g.recover_wallet(&passphrase)));
            }
            Command::Donate {
                publisher_id,
                amount,
                recurring,
                site,
                reply,
            } => self.donate(publisher_id, amount, recurring, site, reply),
            Command::Reconcile { category, reply } => {
                let result = self
                    .flows
                    .begin_reconcile(category)
                    .and_then(|_| self.send_engine(|g| g.reconcile(category)));
                let _ = reply.send(result);
            }
            Command::ExcludePublisher {
                publisher_id,
                reply,
            } => {
                let _ = reply.send(self.send_engine(|g| g.exclude_publisher(&publisher_id)));
            }
            Command::RestorePublishers(reply) => {
                let _ = reply.send(self.send_engine(|g| g.restore_publishers()));
            }
            Command::SetPublisherPreferences { prefs, reply } => {
                let _ = reply.send(self.send_engine(|g| g.set_publisher_preferences(prefs)));
            }
            Command::GetPublisherActivityFromUrl {
                window_id,
                url,
                favicon_url,
                reply,
            } => {
                let request = EngineRequest::GetPublisherActivityFromUrl {
                    window_id,
                    url,
                    favicon_url,
                };
                let _ = reply.send(self.send_engine(|g| g.send(request)));
            }
            Command::TabEvent { event, reply } => {
                let _ = reply.send(self.send_engine(|g| g.send(EngineRequest::TabEvent(event))));
            }
            Command::SetRewardsMainEnabled { enabled, reply } => {
                let _ = reply.send(self.set_rewards_main_enabled(enabled));
            }
            Command::GetRewardsMainEnabled(reply) => {
                let _ = reply.send(Ok(self.policy.main_enabled()));
            }
            Command::SetContributionAutoInclude {
                publisher_id,
                excluded,
                window_id,
                reply,
            } => self.set_contribution_auto_include(publisher_id, excluded, window_id, reply),
            Command::UpdateTipsList(reply) => self.update_tips_list(Some(reply)),

            Command::GetWalletPassphrase(reply) => {
                self.relay_query(|reply| EngineRequest::GetWalletPassphrase { reply }, reply)
            }
            Command::IsWalletCreated(reply) => {
                self.relay_query(|reply| EngineRequest::IsWalletCreated { reply }, reply)
            }
            Command::GetReconcileStamp(reply) => {
                self.relay_query(|reply| EngineRequest::GetReconcileStamp { reply }, reply)
            }
            Command::GetAddresses(reply) => {
                self.relay_query(|reply| EngineRequest::GetAddresses { reply }, reply)
            }
            Command::GetAutoContributeProps(reply) => {
                self.relay_query(|reply| EngineRequest::GetAutoContributeProps { reply }, reply)
            }
            Command::GetContributionAmount(reply) => {
                self.relay_query(|reply| EngineRequest::GetContributionAmount { reply }, reply)
            }
            Command::GetPublisherBanner {
                publisher_id,
                reply,
            } => self.relay_query(
                |reply| EngineRequest::GetPublisherBanner {
                    publisher_id,
                    reply,
                },
                reply,
            ),

            Command::GetCurrentBalanceReport(reply) => self.io_reply(
                |store, _| -> Result<BalanceReport> {
                    let period = Period::current();
                    Ok(store
                        .get_balance_report(period)?
                        .unwrap_or_else(|| BalanceReport::empty(period)))
                },
                reply,
            ),
            Command::GetAllBalanceReports(reply) => {
                self.io_reply(|store, _| store.get_all_balance_reports(), reply)
            }
            Command::GetActivityList {
                start,
                limit,
                filter,
                reply,
            } => self.io_reply(
                move |store, _| store.get_activity_list(start, limit, &filter),
                reply,
            ),
            Command::GetRecurringDonations(reply) => {
                self.io_reply(|store, _| store.get_recurring_donations(), reply)
            }
            Command::RemoveRecurring {
                publisher_id,
                reply,
            } => self.remove_recurring(publisher_id, move |result| {
                let _ = reply.send(result);
            }),
            Command::GetPendingContributionsTotal(reply) => {
                self.io_reply(|store, _| store.pending_contributions_total(), reply)
            }
            Command::ClearPendingContributions(reply) => {
                self.io_reply(|store, _| store.clear_pending_contributions(), reply)
            }
            Command::GetNumExcludedSites(reply) => {
                self.io_reply(|store, _| store.count_excluded(), reply)
            }

            Command::GetNotifications(reply) => {
                let _ = reply.send(Ok(self.policy.active()));
            }
            Command::DeleteNotification { id, reply } => {
                let removed = self.policy.delete(&id);
                if let Some(notification) = &removed {
                    self.observers.notify("notification_deleted", |o| {
                        o.on_notification_deleted(notification)
                    });
                }
                let _ = reply.send(Ok(removed.is_some()));
            }
            Command::SetBackupCompleted(reply) => {
                let removed = self.policy.set_backup_completed();
                self.persist_prefs();
                for notification in &removed {
                    self.observers.notify("notification_deleted", |o| {
                        o.on_notification_deleted(notification)
                    });
                }
                let _ = reply.send(Ok(()));
            }

            Command::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    // ---------------------------------------------------------------
    // Engine callbacks
    // ---------------------------------------------------------------

    fn handle_callback(&mut self, callback: EngineCallback) {
        match callback {
            EngineCallback::LoadState { blob, reply } => {
                self.io_reply(move |_, state| state.load(blob), reply)
            }
            EngineCallback::SaveState { blob, data, reply } => self.io_reply(
                move |_, state| succeeded(&format!("save {}", blob), state.save(blob, &data)),
                reply,
            ),
            EngineCallback::ResetState { blob, reply } => self.io_reply(
                move |_, state| succeeded(&format!("reset {}", blob), state.reset(blob)),
                reply,
            ),
            EngineCallback::LoadConfirmationsState { name, reply } => {
                self.io_reply(move |_, state| state.load_confirmation(&name), reply)
            }
            EngineCallback::SaveConfirmationsState { name, value, reply } => self.io_reply(
                move |_, state| {
                    succeeded(
                        &format!("save confirmations {}", name),
                        state.save_confirmation(&name, &value),
                    )
                },
                reply,
            ),
            EngineCallback::ResetConfirmationsState { name, reply } => self.io_reply(
                move |_, state| {
                    succeeded(
                        &format!("reset confirmations {}", name),
                        state.reset_confirmation(&name),
                    )
                },
                reply,
            ),
            EngineCallback::SetConfirmationsIsReady(ready) => {
                self.shared.confirmations_ready.store(ready, Ordering::SeqCst);
            }

            EngineCallback::LoadUrl { request, reply } => {
                self.fetches.load_url(request, reply);
            }
            EngineCallback::SetTimer {
                namespace,
                offset_secs,
                reply,
            } => {
                let timer_id = self
                    .registry(namespace)
                    .set_timer(Duration::from_secs(offset_secs));
                let _ = reply.send(timer_id);
            }
            EngineCallback::KillTimer {
                namespace,
                timer_id,
            } => {
                if !self.registry(namespace).kill_timer(timer_id) {
                    debug!("Kill of unknown {:?} timer {}", namespace, timer_id);
                }
            }
            EngineCallback::FetchFavIcon {
                url,
                favicon_key,
                reply,
            } => self.fetch_favicon(url, favicon_key, reply),

            EngineCallback::GenerateGuid { reply } => {
                let _ = reply.send(uuid::Uuid::new_v4().to_string());
            }
            EngineCallback::Log {
                level,
                file,
                line,
                message,
            } => match level {
                LogLevel::Error => error!("[engine {}:{}] {}", file, line, message),
                LogLevel::Warning => warn!("[engine {}:{}] {}", file, line, message),
                LogLevel::Info => info!("[engine {}:{}] {}", file, line, message),
                LogLevel::Debug | LogLevel::Request | LogLevel::Response => {
                    debug!("[engine {}:{}] {}", file, line, message)
                }
            },

            EngineCallback::SavePublisherInfo { info, reply } => self.io_reply(
                move |store, _| ledger_result("save publisher", store.upsert_publisher(&info)),
                reply,
            ),
            EngineCallback::LoadPublisherInfo {
                publisher_id,
                reply,
            } => self.io_reply(move |store, _| single(store.get_publisher(&publisher_id)), reply),
            EngineCallback::SaveActivityInfo { info, reply } => self.io_reply(
                move |store, _| ledger_result("save activity", store.save_activity_info(&info)),
                reply,
            ),
            EngineCallback::LoadActivityInfo { filter, reply } => self.io_reply(
                move |store, _| match store.get_activity_list(0, 2, &filter) {
                    Ok(page) => match page.items.len() {
                        0 => (LedgerResult::NotFound, None),
                        1 => (LedgerResult::Ok, page.items.into_iter().next()),
                        _ => (LedgerResult::TooManyResults, None),
                    },
                    Err(e) => {
                        error!("Failed to load activity info: {}", e);
                        (LedgerResult::Error, None)
                    }
                },
                reply,
            ),
            EngineCallback::LoadPanelPublisherInfo {
                publisher_id,
                reconcile_stamp,
                reply,
            } => self.io_reply(
                move |store, _| single(store.get_panel_publisher(&publisher_id, reconcile_stamp)),
                reply,
            ),
            EngineCallback::SaveMediaPublisherInfo {
                media_key,
                publisher_id,
            } => {
                self.media_cache
                    .insert(media_key.clone(), publisher_id.clone());
                self.submit(Box::new(move |store: &PublisherStore, _: &StateStore| {
                    if let Err(e) = store.upsert_media_publisher(&media_key, &publisher_id) {
                        error!("Failed to save media publisher {}: {}", media_key, e);
                    }
                }));
            }
            EngineCallback::LoadMediaPublisherInfo { media_key, reply } => {
                self.load_media_publisher(media_key, reply)
            }
            EngineCallback::GetActivityInfoList {
                start,
                limit,
                filter,
                reply,
            } => self.io_reply(
                move |store, _| match store.get_activity_list(start, limit, &filter) {
                    Ok(page) => (LedgerResult::Ok, page),
                    Err(e) => {
                        error!("Failed to list activity: {}", e);
                        (LedgerResult::Error, PublisherPage::default())
                    }
                },
                reply,
            ),
            EngineCallback::GetRecurringDonations { reply } => self.io_reply(
                |store, _| match store.get_recurring_donations() {
                    Ok(list) => (LedgerResult::Ok, list),
                    Err(e) => {
                        error!("Failed to list recurring donations: {}", e);
                        (LedgerResult::Error, Vec::new())
                    }
                },
                reply,
            ),
            EngineCallback::GetOneTimeTips { reply } => self.io_reply(
                |store, _| match store.get_one_time_tips(Period::current()) {
                    Ok(tips) => (LedgerResult::Ok, tips),
                    Err(e) => {
                        error!("Failed to list one-time tips: {}", e);
                        (LedgerResult::Error, Vec::new())
                    }
                },
                reply,
            ),
            EngineCallback::RemoveRecurring {
                publisher_id,
                reply,
            } => self.remove_recurring(publisher_id, move |result| {
                let _ = reply.send(LedgerResult::from_success(result.is_ok()));
            }),
            EngineCallback::OnRestorePublishers { reply } => self.io(
                |store, _| store.restore_publishers(),
                move |svc, result| {
                    let ok = result.is_ok();
                    let _ = reply.send(ledger_result("restore publishers", result.map(|_| ())));
                    if ok {
                        svc.observers.notify("excluded_sites_changed", |o| {
                            o.on_excluded_sites_changed(ALL_EXCLUDED_SITES, false)
                        });
                    }
                },
            ),
            EngineCallback::SavePendingContributions { list, reply } => self.io_reply(
                move |store, _| {
                    ledger_result(
                        "save pending contributions",
                        store.save_pending_contributions(&list).map(|_| ()),
                    )
                },
                reply,
            ),
            EngineCallback::SaveContributionInfo(contribution) => {
                self.submit(Box::new(move |store: &PublisherStore, _: &StateStore| {
                    if let Err(e) = store.save_contribution(&contribution) {
                        error!(
                            "Failed to save {} contribution for {}: {}",
                            contribution.category, contribution.publisher_id, e
                        );
                    }
                }));
            }

            EngineCallback::OnWalletInitialized(result) => {
                self.flows.finish_wallet(result);
                info!("Wallet initialized: {:?}", result);
                self.observers
                    .notify("wallet_initialized", |o| o.on_wallet_initialized(result));
            }
            EngineCallback::OnWalletProperties(result, wallet) => {
                if result.is_ok() {
                    if let Some(wallet) = &wallet {
                        *self.shared.wallet.write() = Some(wallet.clone());
                    }
                }
                self.observers.notify("wallet_properties", |o| {
                    o.on_wallet_properties(result, wallet.as_ref())
                });
            }
            EngineCallback::OnGrant(result, grant) => {
                self.flows.on_grant(result, &grant);
                self.observers.notify("grant", |o| o.on_grant(result, &grant));
                if result.is_ok() && !self.policy.has_active(NotificationKind::GrantAvailable) {
                    self.raise(
                        NotificationKind::GrantAvailable,
                        vec![grant.promotion_id.clone()],
                    );
                }
            }
            EngineCallback::OnGrantCaptcha { image, hint } => {
                self.observers
                    .notify("grant_captcha", |o| o.on_grant_captcha(&image, &hint));
            }
            EngineCallback::OnRecoverWallet {
                result,
                balance,
                grants,
            } => {
                if result.is_ok() {
                    self.flows.finish_wallet(result);
                }
                self.observers.notify("recover_wallet", |o| {
                    o.on_recover_wallet(result, balance, &grants)
                });
                if result.is_ok() {
                    let _ = self.send_engine(|g| g.fetch_wallet_properties());
                }
            }
            EngineCallback::OnReconcileComplete { result, outcome } => {
                self.on_reconcile_complete(result, outcome)
            }
            EngineCallback::OnGrantFinish(result, grant) => self.on_grant_finish(result, grant),
            EngineCallback::OnPublisherActivity {
                result,
                info,
                window_id,
            } => {
                self.observers.notify("publisher_activity", |o| {
                    o.on_publisher_activity(result, info.as_ref(), window_id)
                });
            }
            EngineCallback::OnExcludedSitesChanged {
                publisher_id,
                excluded,
            } => {
                self.observers.notify("excluded_sites_changed", |o| {
                    o.on_excluded_sites_changed(&publisher_id, excluded)
                });
            }
        }
    }

    // ---------------------------------------------------------------
    // Flows
    // ---------------------------------------------------------------

    fn donate(
        &mut self,
        publisher_id: String,
        amount: f64,
        recurring: bool,
        site: Option<PublisherInfo>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        if publisher_id.is_empty() {
            let _ = reply.send(Err(Error::InvalidState("publisher id is empty".into())));
            return;
        }
        if !amount.is_finite() || amount <= 0.0 {
            let _ = reply.send(Err(Error::InvalidState(format!(
                "invalid donation amount {}",
                amount
            ))));
            return;
        }
        self.io(
            move |store, _| -> Result<PublisherInfo> {
                let mut info = store
                    .get_publisher(&publisher_id)?
                    .unwrap_or_else(|| PublisherInfo::new(publisher_id.clone()));
                if let Some(site) = site {
                    merge_site(&mut info, site);
                }
                store.upsert_publisher(&info)?;
                Ok(info)
            },
            move |svc, result| {
                let info = match result {
                    Ok(info) => info,
                    Err(e) => {
                        error!("Donation aborted, publisher not saved: {}", e);
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = svc.send_engine(|g| g.donate(&info.id, amount, recurring)) {
                    let _ = reply.send(Err(e));
                    return;
                }
                info!("Donated {} to {} (recurring: {})", amount, info.id, recurring);
                let _ = reply.send(Ok(()));

                let site = ContentSite::from(&info);
                if !recurring {
                    svc.notify_content_site(&site);
                    return;
                }
                let now = now_secs();
                let id = info.id;
                svc.io(
                    move |store, _| -> Result<Vec<RecurringDonation>> {
                        store.upsert_recurring(&id, amount, now)?;
                        store.get_recurring_donations()
                    },
                    move |svc, result: Result<Vec<RecurringDonation>>| {
                        match result {
                            Ok(list) => svc.notify_recurring(&list),
                            Err(e) => error!("Failed to save recurring donation: {}", e),
                        }
                        svc.notify_content_site(&site);
                    },
                );
            },
        );
    }

    fn set_rewards_main_enabled(&mut self, enabled: bool) -> Result<()> {
        self.send_engine(|g| g.set_rewards_main_enabled(enabled))?;
        if self.policy.main_enabled() != enabled {
            self.policy.set_main_enabled(enabled);
            self.persist_prefs();
        }
        if enabled {
            self.start_notification_timers();
        } else {
            self.stop_notification_timers();
        }
        self.observers
            .notify("rewards_main_enabled", |o| o.on_rewards_main_enabled(enabled));
        Ok(())
    }

    /// Record the exclusion locally first so the count and the activity
    /// list agree before the engine reports back.
    fn set_contribution_auto_include(
        &mut self,
        publisher_id: String,
        excluded: bool,
        window_id: u64,
        reply: oneshot::Sender<Result<()>>,
    ) {
        let id = publisher_id.clone();
        self.io(
            move |store, _| store.set_excluded(&id, excluded),
            move |svc, result| {
                let result = result.and_then(|_| {
                    svc.send_engine(|g| {
                        g.set_contribution_auto_include(&publisher_id, excluded, window_id)
                    })
                });
                if let Err(e) = &result {
                    error!("Failed to update auto-include for {}: {}", publisher_id, e);
                }
                let _ = reply.send(result);
            },
        );
    }

    fn update_tips_list(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        self.io(
            |store, _| store.get_one_time_tips(Period::current()),
            move |svc, result: Result<Vec<TipRecord>>| match result {
                Ok(tips) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(()));
                    }
                    svc.observers
                        .notify("current_tips", |o| o.on_current_tips(&tips));
                }
                Err(e) => {
                    error!("Failed to load one-time tips: {}", e);
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(e));
                    }
                }
            },
        );
    }

    /// Favicons go through the same fetcher as engine requests; a non-empty
    /// 2xx body counts as fetched.
    fn fetch_favicon(
        &mut self,
        url: String,
        favicon_key: String,
        reply: oneshot::Sender<(bool, String)>,
    ) {
        let (tx, rx) = oneshot::channel();
        let request = UrlRequest {
            url: url.clone(),
            ..Default::default()
        };
        self.fetches.load_url(request, tx);
        tokio::spawn(async move {
            let fetched = match rx.await {
                Ok(response) => (200..300).contains(&response.status) && !response.body.is_empty(),
                Err(_) => false,
            };
            if !fetched {
                debug!("Favicon fetch failed for {}", url);
            }
            let key = if fetched { favicon_key } else { String::new() };
            let _ = reply.send((fetched, key));
        });
    }

    fn remove_recurring(
        &mut self,
        publisher_id: String,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.io(
            move |store, _| -> Result<Vec<RecurringDonation>> {
                if !store.remove_recurring(&publisher_id)? {
                    debug!("No recurring donation for {}", publisher_id);
                }
                store.get_recurring_donations()
            },
            move |svc, result| match result {
                Ok(list) => {
                    done(Ok(()));
                    svc.notify_recurring(&list);
                }
                Err(e) => {
                    error!("Failed to remove recurring donation: {}", e);
                    done(Err(e));
                }
            },
        );
    }

    fn load_media_publisher(
        &mut self,
        media_key: String,
        reply: oneshot::Sender<(LedgerResult, Option<PublisherInfo>)>,
    ) {
        if let Some(publisher_id) = self.media_cache.get(&media_key).cloned() {
            self.io_reply(move |store, _| single(store.get_publisher(&publisher_id)), reply);
            return;
        }
        let key = media_key.clone();
        self.io(
            move |store, _| store.get_media_publisher(&key),
            move |svc, result| {
                if let Ok(Some(info)) = &result {
                    svc.media_cache.insert(media_key, info.id.clone());
                }
                let _ = reply.send(single(result));
            },
        );
    }

    fn on_reconcile_complete(&mut self, result: LedgerResult, outcome: ReconcileOutcome) {
        self.flows
            .finish_reconcile(outcome.category, result, outcome.probi, &outcome.viewing_id);
        info!(
            "Reconcile {} complete: {:?} ({} probi, viewing {})",
            outcome.category, result, outcome.probi, outcome.viewing_id
        );
        self.observers.notify("reconcile_complete", |o| {
            o.on_reconcile_complete(result, &outcome.viewing_id, outcome.category, outcome.probi)
        });
        if !result.is_ok() {
            return;
        }

        let category = outcome.category;
        self.io(
            move |store, _| book_reconcile(store, &outcome),
            move |svc, result| {
                match result {
                    Ok(report) => svc.notify_report(&report),
                    Err(e) => error!("Failed to record reconcile: {}", e),
                }
                if category == RewardsCategory::OneTimeTip {
                    svc.update_tips_list(None);
                }
                let _ = svc.send_engine(|g| g.fetch_wallet_properties());
                svc.evaluate_notifications();
            },
        );
    }

    fn on_grant_finish(&mut self, result: LedgerResult, grant: Grant) {
        self.flows.finish_grant(result);
        info!("Grant {} finished: {:?}", grant.promotion_id, result);
        self.observers
            .notify("grant_finish", |o| o.on_grant_finish(result, &grant));
        if !result.is_ok() {
            return;
        }

        for notification in self.policy.remove_kind(NotificationKind::GrantAvailable) {
            self.observers.notify("notification_deleted", |o| {
                o.on_notification_deleted(&notification)
            });
        }

        let amount = grant.probi;
        self.io(
            move |store, _| {
                store.add_to_balance_report(Period::current(), BalanceReportKind::Grant, amount)
            },
            |svc, result| {
                match result {
                    Ok(report) => svc.notify_report(&report),
                    Err(e) => error!("Failed to record grant: {}", e),
                }
                let _ = svc.send_engine(|g| g.fetch_wallet_properties());
            },
        );
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    fn evaluate_notifications(&mut self) {
        if !self.gateway.is_connected()
            || !self.flows.wallet_ready()
            || !self.policy.main_enabled()
        {
            return;
        }
        self.query_engine(
            |reply| EngineRequest::GetBootStamp { reply },
            |svc, boot_stamp| svc.maybe_show_backup(boot_stamp),
        );
        self.query_engine(
            |reply| EngineRequest::GetReconcileStamp { reply },
            |svc, reconcile_stamp| svc.maybe_show_add_funds(reconcile_stamp),
        );
    }

    fn maybe_show_backup(&mut self, boot_stamp: u64) {
        if !self.policy.should_show_backup(boot_stamp, now_secs()) {
            return;
        }
        self.policy.backup_shown();
        self.persist_prefs();
        self.raise(NotificationKind::BackupWallet, Vec::new());
    }

    fn maybe_show_add_funds(&mut self, reconcile_stamp: u64) {
        if !self.policy.add_funds_candidate(reconcile_stamp, now_secs()) {
            return;
        }
        self.query_engine(
            |reply| EngineRequest::HasSufficientBalanceToReconcile { reply },
            move |svc, sufficient| {
                let now = now_secs();
                if sufficient || !svc.policy.add_funds_candidate(reconcile_stamp, now) {
                    return;
                }
                svc.policy.add_funds_shown(now);
                svc.persist_prefs();
                svc.raise(NotificationKind::InsufficientFunds, Vec::new());
            },
        );
    }

    fn raise(&mut self, kind: NotificationKind, args: Vec<String>) {
        let notification = self.policy.add(kind, args, now_secs());
        self.observers.notify("notification_added", |o| {
            o.on_notification_added(&notification)
        });
    }

    fn persist_prefs(&self) {
        let prefs = self.policy.prefs().clone();
        let path = self.policy.prefs_path().to_path_buf();
        self.submit(Box::new(move |_: &PublisherStore, _: &StateStore| {
            if let Err(e) = prefs.save(&path) {
                error!("Failed to save notification prefs: {}", e);
            }
        }));
    }

    fn notify_report(&self, report: &BalanceReport) {
        self.observers
            .notify("current_balance_report", |o| o.on_current_balance_report(report));
    }

    fn notify_recurring(&self, list: &[RecurringDonation]) {
        self.observers.notify("recurring_donation_updated", |o| {
            o.on_recurring_donation_updated(list)
        });
    }

    fn notify_content_site(&self, site: &ContentSite) {
        self.observers
            .notify("content_site_updated", |o| o.on_content_site_updated(site));
    }
}

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

/// Record a settled reconcile: one contribution per direction, the total in
/// the period's report, and the settled pending entries removed.
fn book_reconcile(store: &PublisherStore, outcome: &ReconcileOutcome) -> Result<BalanceReport> {
    let period = Period::current();
    let now = now_secs();
    for direction in &outcome.directions {
        store.save_contribution(&ContributionInfo {
            publisher_id: direction.publisher_id.clone(),
            probi: direction.probi,
            category: outcome.category,
            month: period.month,
            year: period.year,
            date: now,
        })?;
    }
    let report = store.add_to_balance_report(period, outcome.category.into(), outcome.probi)?;
    if !outcome.viewing_id.is_empty() {
        let cleared = store.remove_pending_for_viewing(&outcome.viewing_id)?;
        if cleared > 0 {
            debug!("Cleared {} settled pending contributions", cleared);
        }
    }
    Ok(report)
}

fn merge_site(info: &mut PublisherInfo, site: PublisherInfo) {
    if !site.name.is_empty() {
        info.name = site.name;
    }
    if !site.url.is_empty() {
        info.url = site.url;
    }
    if !site.favicon_url.is_empty() {
        info.favicon_url = site.favicon_url;
    }
    if !site.provider.is_empty() {
        info.provider = site.provider;
    }
    info.verified = site.verified;
}

fn succeeded(op: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to {}: {}", op, e);
            false
        }
    }
}

fn ledger_result(op: &str, result: Result<()>) -> LedgerResult {
    LedgerResult::from_success(succeeded(op, result))
}

fn single(result: Result<Option<PublisherInfo>>) -> (LedgerResult, Option<PublisherInfo>) {
    match result {
        Ok(Some(info)) => (LedgerResult::Ok, Some(info)),
        Ok(None) => (LedgerResult::NotFound, None),
        Err(e) => {
            error!("Publisher lookup failed: {}", e);
            (LedgerResult::Error, None)
        }
    }
}
