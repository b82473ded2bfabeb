//! Backup and add-funds reminder policy.
//!
//! The policy only decides; the service asks the engine for the stamps it
//! needs and raises the notifications. Preferences survive restarts in
//! `notification_prefs.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Notification, NotificationKind};
use rewards_core::{NotificationSettings, Result};

/// Persisted reminder state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    /// Rewards main switch. Reminder timers only run while it is on.
    #[serde(default = "main_enabled_default")]
    pub main_enabled: bool,
    /// Set once the user confirmed the wallet backup.
    #[serde(default)]
    pub backup_completed: bool,
    /// Seconds after boot before the next backup reminder. 0 = not yet set.
    #[serde(default)]
    pub backup_interval_secs: u64,
    /// Earliest unix time for the next add-funds reminder.
    #[serde(default)]
    pub add_funds_snooze_until: u64,
}

fn main_enabled_default() -> bool {
    true
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            main_enabled: true,
            backup_completed: false,
            backup_interval_secs: 0,
            add_funds_snooze_until: 0,
        }
    }
}

impl NotificationPrefs {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!("Ignoring unreadable {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

pub struct NotificationPolicy {
    settings: NotificationSettings,
    prefs_path: PathBuf,
    prefs: NotificationPrefs,
    active: BTreeMap<String, Notification>,
}

impl NotificationPolicy {
    pub fn load(settings: NotificationSettings, prefs_path: impl Into<PathBuf>) -> Self {
        let prefs_path = prefs_path.into();
        let prefs = NotificationPrefs::load(&prefs_path);
        Self {
            settings,
            prefs_path,
            prefs,
            active: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    pub fn prefs(&self) -> &NotificationPrefs {
        &self.prefs
    }

    pub fn prefs_path(&self) -> &Path {
        &self.prefs_path
    }

    pub fn main_enabled(&self) -> bool {
        self.prefs.main_enabled
    }

    pub fn set_main_enabled(&mut self, enabled: bool) {
        self.prefs.main_enabled = enabled;
        info!("Rewards main switch {}", if enabled { "on" } else { "off" });
    }

    fn backup_interval(&self) -> u64 {
        if self.prefs.backup_interval_secs == 0 {
            self.settings.backup_interval.as_secs()
        } else {
            self.prefs.backup_interval_secs
        }
    }

    // ---------------------------------------------------------------
    // Backup reminder
    // ---------------------------------------------------------------

    pub fn should_show_backup(&self, boot_stamp: u64, now: u64) -> bool {
        if self.prefs.backup_completed || boot_stamp == 0 {
            return false;
        }
        if self.has_active(NotificationKind::BackupWallet) {
            return false;
        }
        now.saturating_sub(boot_stamp) > self.backup_interval()
    }

    /// Record that the backup reminder was shown and push the next one out.
    pub fn backup_shown(&mut self) {
        let next = self.backup_interval() + self.settings.backup_frequency.as_secs();
        self.prefs.backup_interval_secs = next;
        debug!("Next backup reminder after {}s from boot", next);
    }

    /// Suppress backup reminders for good. Returns the backup notifications
    /// that were still active.
    pub fn set_backup_completed(&mut self) -> Vec<Notification> {
        self.prefs.backup_completed = true;
        info!("Wallet backup completed");
        self.remove_kind(NotificationKind::BackupWallet)
    }

    // ---------------------------------------------------------------
    // Add-funds reminder
    // ---------------------------------------------------------------

    /// Whether to ask the engine about the balance at all.
    pub fn add_funds_candidate(&self, reconcile_stamp: u64, now: u64) -> bool {
        if reconcile_stamp == 0 || self.has_active(NotificationKind::InsufficientFunds) {
            return false;
        }
        let window = self.settings.add_funds_window.as_secs();
        now.saturating_add(window) >= reconcile_stamp && now >= self.prefs.add_funds_snooze_until
    }

    pub fn add_funds_shown(&mut self, now: u64) {
        self.prefs.add_funds_snooze_until = now.saturating_add(self.settings.add_funds_snooze.as_secs());
    }

    // ---------------------------------------------------------------
    // Active notifications
    // ---------------------------------------------------------------

    pub fn add(&mut self, kind: NotificationKind, args: Vec<String>, now: u64) -> Notification {
        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp: now,
            args,
        };
        self.active
            .insert(notification.id.clone(), notification.clone());
        info!("Notification added: {:?} ({})", kind, notification.id);
        notification
    }

    pub fn delete(&mut self, id: &str) -> Option<Notification> {
        self.active.remove(id)
    }

    pub fn has_active(&self, kind: NotificationKind) -> bool {
        self.active.values().any(|n| n.kind == kind)
    }

    pub fn active(&self) -> Vec<Notification> {
        let mut list: Vec<Notification> = self.active.values().cloned().collect();
        list.sort_by_key(|n| n.timestamp);
        list
    }

    /// Remove every active notification of `kind`.
    pub fn remove_kind(&mut self, kind: NotificationKind) -> Vec<Notification> {
        let ids: Vec<String> = self
            .active
            .values()
            .filter(|n| n.kind == kind)
            .map(|n| n.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.active.remove(id)).collect()
    }
}
