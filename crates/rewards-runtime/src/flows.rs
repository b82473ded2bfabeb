//! Wallet, grant, and reconcile flow state machines.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{Grant, GrantPhase};
use rewards_core::{Error, LedgerResult, Probi, Result, RewardsCategory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletFlow {
    Idle,
    Requested,
    Ready,
    Failed(LedgerResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantFlow {
    Idle,
    GrantsRequested,
    GrantsReady(Grant),
    CaptchaRequested(Grant),
    CaptchaSolved(Grant),
    Finished(LedgerResult),
    Failed(LedgerResult),
}

impl GrantFlow {
    fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::GrantsRequested | Self::CaptchaRequested(_) | Self::CaptchaSolved(_)
        )
    }

    /// Phase of the grant currently held by the flow, if any.
    pub fn phase(&self) -> Option<GrantPhase> {
        match self {
            Self::GrantsReady(_) => Some(GrantPhase::Fetched),
            Self::CaptchaRequested(_) => Some(GrantPhase::CaptchaPending),
            Self::CaptchaSolved(_) => Some(GrantPhase::Solved),
            Self::Finished(_) => Some(GrantPhase::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileFlow {
    Idle,
    Reconciling,
    Complete { probi: Probi, viewing_id: String },
    Failed(LedgerResult),
}

/// Flows that were pending when the engine link dropped.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AbortedFlows {
    pub wallet: bool,
    pub grant: bool,
    pub reconciles: Vec<RewardsCategory>,
}

/// All flow state, owned by the service loop.
#[derive(Debug)]
pub struct Flows {
    wallet: WalletFlow,
    grant: GrantFlow,
    reconcile: HashMap<RewardsCategory, ReconcileFlow>,
}

impl Default for Flows {
    fn default() -> Self {
        Self::new()
    }
}

impl Flows {
    pub fn new() -> Self {
        Self {
            wallet: WalletFlow::Idle,
            grant: GrantFlow::Idle,
            reconcile: HashMap::new(),
        }
    }

    pub fn wallet(&self) -> &WalletFlow {
        &self.wallet
    }

    pub fn grant(&self) -> &GrantFlow {
        &self.grant
    }

    pub fn reconcile(&self, category: RewardsCategory) -> &ReconcileFlow {
        self.reconcile
            .get(&category)
            .unwrap_or(&ReconcileFlow::Idle)
    }

    pub fn wallet_ready(&self) -> bool {
        self.wallet == WalletFlow::Ready
    }

    // ---------------------------------------------------------------
    // Wallet
    // ---------------------------------------------------------------

    pub fn begin_wallet(&mut self) -> Result<()> {
        match self.wallet {
            WalletFlow::Requested => Err(Error::FlowInProgress("wallet creation".into())),
            WalletFlow::Ready => Err(Error::InvalidState("wallet already created".into())),
            WalletFlow::Idle | WalletFlow::Failed(_) => {
                self.wallet = WalletFlow::Requested;
                Ok(())
            }
        }
    }

    /// Apply `OnWalletInitialized`. A success outside a creation request
    /// means the engine loaded an existing wallet.
    pub fn finish_wallet(&mut self, result: LedgerResult) {
        self.wallet = match (&self.wallet, result.is_ok()) {
            (_, true) => WalletFlow::Ready,
            (WalletFlow::Requested, false) => WalletFlow::Failed(result),
            (current, false) => current.clone(),
        };
        debug!("Wallet flow -> {:?}", self.wallet);
    }

    // ---------------------------------------------------------------
    // Grants
    // ---------------------------------------------------------------

    pub fn begin_fetch_grants(&mut self) -> Result<()> {
        if self.grant.is_pending() {
            return Err(Error::FlowInProgress("grant".into()));
        }
        self.grant = GrantFlow::GrantsRequested;
        Ok(())
    }

    /// Apply `OnGrant`. Returns false when the event would move an in-progress
    /// grant backward and was ignored by the flow.
    pub fn on_grant(&mut self, result: LedgerResult, grant: &Grant) -> bool {
        let backward = self.grant.is_pending()
            && self
                .grant
                .phase()
                .is_some_and(|phase| !phase.can_advance_to(GrantPhase::Fetched));
        if backward {
            warn!("Ignoring grant event while a captcha is in progress");
            return false;
        }
        match (&self.grant, result.is_ok()) {
            (_, true) => {
                self.grant = GrantFlow::GrantsReady(grant.clone());
                true
            }
            (GrantFlow::GrantsRequested, false) => {
                self.grant = GrantFlow::Failed(result);
                true
            }
            (_, false) => true,
        }
    }

    pub fn begin_captcha(&mut self) -> Result<()> {
        match &self.grant {
            GrantFlow::GrantsReady(grant) | GrantFlow::CaptchaRequested(grant) => {
                self.grant = GrantFlow::CaptchaRequested(grant.clone());
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "no grant awaiting a captcha ({:?})",
                other
            ))),
        }
    }

    pub fn begin_solve(&mut self) -> Result<()> {
        match &self.grant {
            GrantFlow::CaptchaRequested(grant) => {
                self.grant = GrantFlow::CaptchaSolved(grant.clone());
                Ok(())
            }
            GrantFlow::CaptchaSolved(_) => Err(Error::FlowInProgress("captcha solve".into())),
            other => Err(Error::InvalidState(format!(
                "no captcha to solve ({:?})",
                other
            ))),
        }
    }

    /// Apply `OnGrantFinish`.
    pub fn finish_grant(&mut self, result: LedgerResult) {
        self.grant = if result.is_ok() {
            GrantFlow::Finished(result)
        } else {
            GrantFlow::Failed(result)
        };
        debug!("Grant flow -> {:?}", self.grant);
    }

    // ---------------------------------------------------------------
    // Reconcile
    // ---------------------------------------------------------------

    pub fn begin_reconcile(&mut self, category: RewardsCategory) -> Result<()> {
        let flow = self.reconcile.entry(category).or_insert(ReconcileFlow::Idle);
        if *flow == ReconcileFlow::Reconciling {
            return Err(Error::FlowInProgress(format!("reconcile {}", category)));
        }
        *flow = ReconcileFlow::Reconciling;
        Ok(())
    }

    /// Apply `OnReconcileComplete` for one category.
    pub fn finish_reconcile(
        &mut self,
        category: RewardsCategory,
        result: LedgerResult,
        probi: Probi,
        viewing_id: &str,
    ) {
        let next = if result.is_ok() {
            ReconcileFlow::Complete {
                probi,
                viewing_id: viewing_id.to_string(),
            }
        } else {
            ReconcileFlow::Failed(result)
        };
        debug!("Reconcile {} -> {:?}", category, next);
        self.reconcile.insert(category, next);
    }

    /// Fail every pending flow. Used when the engine link is lost.
    pub fn abort_pending(&mut self) -> AbortedFlows {
        let mut aborted = AbortedFlows::default();
        if self.wallet == WalletFlow::Requested {
            self.wallet = WalletFlow::Failed(LedgerResult::Error);
            aborted.wallet = true;
        }
        if self.grant.is_pending() {
            self.grant = GrantFlow::Failed(LedgerResult::Error);
            aborted.grant = true;
        }
        for (category, flow) in self.reconcile.iter_mut() {
            if *flow == ReconcileFlow::Reconciling {
                *flow = ReconcileFlow::Failed(LedgerResult::Error);
                aborted.reconciles.push(*category);
            }
        }
        aborted.reconciles.sort();
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant() -> Grant {
        Grant {
            promotion_id: "promo-1".into(),
            probi: Probi(30),
            ..Default::default()
        }
    }

    #[test]
    fn test_wallet_flow() {
        let mut flows = Flows::new();
        flows.begin_wallet().unwrap();
        assert!(matches!(flows.begin_wallet(), Err(Error::FlowInProgress(_))));

        flows.finish_wallet(LedgerResult::Error);
        assert_eq!(*flows.wallet(), WalletFlow::Failed(LedgerResult::Error));

        flows.begin_wallet().unwrap();
        flows.finish_wallet(LedgerResult::WalletCreated);
        assert!(flows.wallet_ready());
        assert!(matches!(flows.begin_wallet(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_wallet_loaded_at_startup() {
        let mut flows = Flows::new();
        flows.finish_wallet(LedgerResult::NoLedgerState);
        assert_eq!(*flows.wallet(), WalletFlow::Idle);
        flows.finish_wallet(LedgerResult::Ok);
        assert!(flows.wallet_ready());
    }

    #[test]
    fn test_grant_flow_with_captcha() {
        let mut flows = Flows::new();
        flows.begin_fetch_grants().unwrap();
        assert!(matches!(flows.begin_fetch_grants(), Err(Error::FlowInProgress(_))));
        assert!(flows.begin_captcha().is_err());

        assert!(flows.on_grant(LedgerResult::Ok, &grant()));
        assert_eq!(flows.grant().phase(), Some(GrantPhase::Fetched));

        flows.begin_captcha().unwrap();
        assert_eq!(flows.grant().phase(), Some(GrantPhase::CaptchaPending));
        assert!(!flows.on_grant(LedgerResult::Ok, &grant()));
        assert_eq!(flows.grant().phase(), Some(GrantPhase::CaptchaPending));

        flows.begin_solve().unwrap();
        assert!(matches!(flows.begin_solve(), Err(Error::FlowInProgress(_))));
        assert!(flows.begin_captcha().is_err());
        assert_eq!(flows.grant().phase(), Some(GrantPhase::Solved));

        flows.finish_grant(LedgerResult::Ok);
        assert_eq!(flows.grant().phase(), Some(GrantPhase::Finished));
        flows.begin_fetch_grants().unwrap();
    }

    #[test]
    fn test_grant_directly_claimable() {
        let mut flows = Flows::new();
        flows.begin_fetch_grants().unwrap();
        flows.on_grant(LedgerResult::Ok, &grant());
        flows.finish_grant(LedgerResult::Ok);
        assert_eq!(*flows.grant(), GrantFlow::Finished(LedgerResult::Ok));
    }

    #[test]
    fn test_grant_fetch_failure() {
        let mut flows = Flows::new();
        flows.begin_fetch_grants().unwrap();
        flows.on_grant(LedgerResult::GrantNotFound, &Grant::default());
        assert_eq!(*flows.grant(), GrantFlow::Failed(LedgerResult::GrantNotFound));
        flows.begin_fetch_grants().unwrap();
    }

    #[test]
    fn test_reconcile_per_category() {
        let mut flows = Flows::new();
        flows.begin_reconcile(RewardsCategory::RecurringTip).unwrap();
        flows.begin_reconcile(RewardsCategory::OneTimeTip).unwrap();
        assert!(matches!(
            flows.begin_reconcile(RewardsCategory::RecurringTip),
            Err(Error::FlowInProgress(_))
        ));

        flows.finish_reconcile(RewardsCategory::RecurringTip, LedgerResult::Ok, Probi(1000), "v1");
        assert_eq!(
            *flows.reconcile(RewardsCategory::RecurringTip),
            ReconcileFlow::Complete {
                probi: Probi(1000),
                viewing_id: "v1".into()
            }
        );
        assert_eq!(*flows.reconcile(RewardsCategory::OneTimeTip), ReconcileFlow::Reconciling);
        assert_eq!(*flows.reconcile(RewardsCategory::AutoContribute), ReconcileFlow::Idle);
        flows.begin_reconcile(RewardsCategory::RecurringTip).unwrap();
    }

    #[test]
    fn test_abort_pending() {
        let mut flows = Flows::new();
        flows.begin_wallet().unwrap();
        flows.begin_fetch_grants().unwrap();
        flows.begin_reconcile(RewardsCategory::OneTimeTip).unwrap();
        flows.begin_reconcile(RewardsCategory::AutoContribute).unwrap();
        flows.finish_reconcile(RewardsCategory::AutoContribute, LedgerResult::Ok, Probi(1), "v");

        let aborted = flows.abort_pending();
        assert!(aborted.wallet);
        assert!(aborted.grant);
        assert_eq!(aborted.reconciles, vec![RewardsCategory::OneTimeTip]);
        assert_eq!(flows.abort_pending(), AbortedFlows::default());
    }
}
