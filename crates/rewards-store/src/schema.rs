//! Publisher info database schema.

/// Publisher identity and per-period activity.
pub const PUBLISHER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS publisher_info (
    publisher_id TEXT PRIMARY KEY NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,
    excluded INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL DEFAULT '',
    favicon TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    provider TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS activity_info (
    publisher_id TEXT NOT NULL REFERENCES publisher_info(publisher_id) ON DELETE CASCADE,
    duration INTEGER NOT NULL DEFAULT 0,
    visits INTEGER NOT NULL DEFAULT 0,
    score DOUBLE NOT NULL DEFAULT 0,
    percent INTEGER NOT NULL DEFAULT 0,
    weight DOUBLE NOT NULL DEFAULT 0,
    reconcile_stamp INTEGER NOT NULL DEFAULT 0,
    last_visit INTEGER NOT NULL DEFAULT 0,
    category INTEGER NOT NULL DEFAULT 2,
    month INTEGER NOT NULL DEFAULT 0,
    year INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (publisher_id, reconcile_stamp)
);

CREATE INDEX IF NOT EXISTS idx_activity_stamp ON activity_info(reconcile_stamp);
CREATE INDEX IF NOT EXISTS idx_activity_category ON activity_info(category, year, month);
CREATE INDEX IF NOT EXISTS idx_publisher_excluded ON publisher_info(excluded);

CREATE TABLE IF NOT EXISTS media_publisher_info (
    media_key TEXT PRIMARY KEY NOT NULL,
    publisher_id TEXT NOT NULL
);
"#;

/// Donations, contributions, and balance reports.
pub const CONTRIBUTION_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS recurring_donation (
    publisher_id TEXT PRIMARY KEY NOT NULL,
    amount DOUBLE NOT NULL DEFAULT 0,
    added_date INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contribution_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    publisher_id TEXT NOT NULL DEFAULT '',
    probi TEXT NOT NULL DEFAULT '0',
    date INTEGER NOT NULL,
    category INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contribution_period ON contribution_info(year, month);

CREATE TABLE IF NOT EXISTS pending_contribution (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    publisher_id TEXT NOT NULL,
    probi TEXT NOT NULL DEFAULT '0',
    added_date INTEGER NOT NULL,
    viewing_id TEXT NOT NULL DEFAULT '',
    category INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS balance_report (
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    grants TEXT NOT NULL DEFAULT '0',
    earning_from_ads TEXT NOT NULL DEFAULT '0',
    auto_contribute TEXT NOT NULL DEFAULT '0',
    recurring_donation TEXT NOT NULL DEFAULT '0',
    one_time_donation TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (year, month)
);
"#;

/// Tables the CLI validator expects to find.
pub const REQUIRED_TABLES: &[&str] = &[
    "publisher_info",
    "activity_info",
    "media_publisher_info",
    "recurring_donation",
    "contribution_info",
    "pending_contribution",
    "balance_report",
];
