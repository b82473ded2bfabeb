//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Paths to all rewards data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory.
    pub root: PathBuf,
    /// Engine ledger state blob (`ledger_state`).
    pub ledger_state: PathBuf,
    /// Engine publisher state blob (`publisher_state`).
    pub publisher_state: PathBuf,
    /// Engine publisher list blob (`publisher_list.json`).
    pub publisher_list: PathBuf,
    /// Publisher info database directory (`publisher_info_db/`).
    pub publisher_info_db: PathBuf,
    /// Confirmations key/value directory (`confirmations/`).
    pub confirmations: PathBuf,
    /// Notification policy preferences (`notification_prefs.json`).
    pub notification_prefs: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let paths = Self::at(root);
        paths.ensure_dirs()?;
        Ok(paths)
    }

    /// Data paths under `root` without touching the filesystem.
    pub fn at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            ledger_state: root.join("ledger_state"),
            publisher_state: root.join("publisher_state"),
            publisher_list: root.join("publisher_list.json"),
            publisher_info_db: root.join("publisher_info_db"),
            confirmations: root.join("confirmations"),
            notification_prefs: root.join("notification_prefs.json"),
            root,
        }
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.publisher_info_db)?;
        std::fs::create_dir_all(&self.confirmations)?;
        Ok(())
    }
}

/// Timing knobs for the backup and add-funds reminders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Delay before the first evaluation after start.
    pub startup_delay: Duration,
    /// Interval between periodic evaluations.
    pub periodic_interval: Duration,
    /// Elapsed time since boot before the first backup reminder.
    pub backup_interval: Duration,
    /// Added to the backup interval each time the reminder is shown.
    pub backup_frequency: Duration,
    /// Add-funds is considered only when reconcile is this close.
    pub add_funds_window: Duration,
    /// Minimum gap between two add-funds reminders.
    pub add_funds_snooze: Duration,
}

const DAY_SECS: u64 = 24 * 60 * 60;

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(30),
            periodic_interval: Duration::from_secs(DAY_SECS),
            backup_interval: Duration::from_secs(7 * DAY_SECS),
            backup_frequency: Duration::from_secs(7 * DAY_SECS),
            add_funds_window: Duration::from_secs(3 * DAY_SECS),
            add_funds_snooze: Duration::from_secs(3 * DAY_SECS),
        }
    }
}

impl NotificationSettings {
    /// Defaults overridden by `REWARDS_NOTIFICATION_*_SECS` variables.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        override_secs("REWARDS_NOTIFICATION_STARTUP_SECS", &mut s.startup_delay);
        override_secs("REWARDS_NOTIFICATION_PERIODIC_SECS", &mut s.periodic_interval);
        override_secs("REWARDS_NOTIFICATION_BACKUP_SECS", &mut s.backup_interval);
        override_secs("REWARDS_NOTIFICATION_BACKUP_FREQUENCY_SECS", &mut s.backup_frequency);
        override_secs("REWARDS_NOTIFICATION_ADD_FUNDS_WINDOW_SECS", &mut s.add_funds_window);
        override_secs("REWARDS_NOTIFICATION_ADD_FUNDS_SNOOZE_SECS", &mut s.add_funds_snooze);
        s
    }
}

fn override_secs(var: &str, target: &mut Duration) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<u64>() {
            Ok(secs) => *target = Duration::from_secs(secs),
            Err(_) => warn!("Ignoring {}={}: not a number of seconds", var, raw),
        }
    }
}

/// Engine environment derived from host flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEnv {
    /// Production servers unless `staging=true`.
    pub production: bool,
    /// Reconcile interval override in minutes (0 = engine default).
    pub reconcile_interval: u32,
    pub short_retries: bool,
}

impl Default for EngineEnv {
    fn default() -> Self {
        Self {
            production: true,
            reconcile_interval: 0,
            short_retries: false,
        }
    }
}

impl EngineEnv {
    /// Parse a comma separated flag list such as
    /// `staging=true,reconcile-interval=10,short-retries=true`.
    pub fn parse_flags(options: &str) -> Self {
        let mut env = Self::default();
        for flag in options.split(',') {
            let Some((name, value)) = flag.split_once('=') else {
                continue;
            };
            let name = name.trim().to_lowercase();
            let value = value.trim().to_lowercase();
            match name.as_str() {
                "staging" => env.production = value != "true" && value != "1",
                "reconcile-interval" => match value.parse::<u32>() {
                    Ok(minutes) if minutes > 0 => env.reconcile_interval = minutes,
                    _ => warn!("Ignoring reconcile-interval={}", value),
                },
                "short-retries" => env.short_retries = value == "true" || value == "1",
                other => warn!("Unknown rewards flag: {}", other),
            }
        }
        env
    }
}

/// Top-level rewards configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    pub data_paths: DataPaths,
    pub notifications: NotificationSettings,
    pub engine_env: EngineEnv,
}

impl RewardsConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let data_paths = DataPaths::new(data_dir)?;
        let engine_env = std::env::var("REWARDS_FLAGS")
            .map(|f| EngineEnv::parse_flags(&f))
            .unwrap_or_default();

        Ok(Self {
            data_paths,
            notifications: NotificationSettings::from_env(),
            engine_env,
        })
    }

    /// Configuration with default settings, ignoring the environment.
    pub fn with_defaults(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            data_paths: DataPaths::new(data_dir)?,
            notifications: NotificationSettings::default(),
            engine_env: EngineEnv::default(),
        })
    }
}
