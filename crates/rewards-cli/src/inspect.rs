//! Data directory inspection: checks the publisher database and engine
//! state files without starting the service.
//!
//! The database is opened read-only, so a directory in use by a running
//! service can be inspected safely.

use std::path::Path;

use rusqlite::Connection;
use tracing::{error, info};

use rewards_core::DataPaths;
use rewards_store::schema::REQUIRED_TABLES;
use rewards_store::PUBLISHER_DB_FILE;

/// Result of inspecting a data directory.
#[derive(Debug)]
pub struct InspectReport {
    pub db_valid: bool,
    pub publishers: i64,
    pub excluded_publishers: i64,
    pub recurring_donations: i64,
    pub contributions: i64,
    pub pending_contributions: i64,
    pub balance_reports: i64,
    pub ledger_state: bool,
    pub publisher_state: bool,
    pub publisher_list: bool,
    pub confirmations: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Inspect `data_dir`. Never writes to it.
pub fn validate(data_dir: &Path) -> InspectReport {
    let paths = DataPaths::at(data_dir);
    let mut report = InspectReport {
        db_valid: false,
        publishers: 0,
        excluded_publishers: 0,
        recurring_donations: 0,
        contributions: 0,
        pending_contributions: 0,
        balance_reports: 0,
        ledger_state: paths.ledger_state.is_file(),
        publisher_state: paths.publisher_state.is_file(),
        publisher_list: paths.publisher_list.is_file(),
        confirmations: count_files(&paths.confirmations),
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    if !report.ledger_state {
        report
            .warnings
            .push("No ledger state saved; wallet was never created".to_string());
    }
    if !report.publisher_state {
        report.warnings.push("No publisher state saved".to_string());
    }

    let db_path = paths.publisher_info_db.join(PUBLISHER_DB_FILE);
    if !db_path.exists() {
        report
            .errors
            .push(format!("Database not found: {}", db_path.display()));
        return report;
    }

    let conn = match Connection::open_with_flags(
        &db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    ) {
        Ok(c) => c,
        Err(e) => {
            report.errors.push(format!("Failed to open database: {}", e));
            return report;
        }
    };

    for table in REQUIRED_TABLES {
        match table_exists(&conn, table) {
            Ok(true) => {}
            Ok(false) => report
                .errors
                .push(format!("Missing required table: {}", table)),
            Err(e) => report
                .errors
                .push(format!("Error checking table {}: {}", table, e)),
        }
    }
    if !report.errors.is_empty() {
        return report;
    }

    let counts = [
        ("SELECT COUNT(*) FROM publisher_info", &mut report.publishers),
        (
            "SELECT COUNT(*) FROM publisher_info WHERE excluded = 1",
            &mut report.excluded_publishers,
        ),
        (
            "SELECT COUNT(*) FROM recurring_donation",
            &mut report.recurring_donations,
        ),
        ("SELECT COUNT(*) FROM contribution_info", &mut report.contributions),
        (
            "SELECT COUNT(*) FROM pending_contribution",
            &mut report.pending_contributions,
        ),
        ("SELECT COUNT(*) FROM balance_report", &mut report.balance_reports),
    ];
    let mut failures = Vec::new();
    for (sql, slot) in counts {
        match conn.query_row(sql, [], |row| row.get::<_, i64>(0)) {
            Ok(n) => *slot = n,
            Err(e) => failures.push(format!("Count failed ({}): {}", sql, e)),
        }
    }
    report.errors.extend(failures);

    report.db_valid = report.errors.is_empty();
    if report.db_valid {
        info!(
            "Validated {}: {} publishers, {} balance reports",
            db_path.display(),
            report.publishers,
            report.balance_reports
        );
    } else {
        error!("Validation of {} failed", db_path.display());
    }
    report
}

/// Print an inspection report to stdout.
pub fn print_report(report: &InspectReport) {
    println!("=== Rewards Data Report ===");
    println!();
    println!("Database valid:     {}", if report.db_valid { "YES" } else { "NO" });
    println!("Publishers:         {}", report.publishers);
    println!("Excluded:           {}", report.excluded_publishers);
    println!("Recurring tips:     {}", report.recurring_donations);
    println!("Contributions:      {}", report.contributions);
    println!("Pending:            {}", report.pending_contributions);
    println!("Balance reports:    {}", report.balance_reports);
    println!("Ledger state:       {}", present(report.ledger_state));
    println!("Publisher state:    {}", present(report.publisher_state));
    println!("Publisher list:     {}", present(report.publisher_list));
    println!("Confirmations:      {}", report.confirmations);

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &report.warnings {
            println!("  - {}", w);
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }

    println!();
    if report.db_valid {
        println!("Status: OK");
    } else {
        println!("Status: INVALID");
    }
}

// Internal helpers

fn present(found: bool) -> &'static str {
    if found {
        "present"
    } else {
        "missing"
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_file())
                .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .count()
        })
        .unwrap_or(0)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::{Period, Probi};
    use rewards_store::{BalanceReportKind, PublisherInfo, PublisherStore, StateBlob, StateStore};

    #[test]
    fn test_validate_populated_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        {
            let store = PublisherStore::open(&paths.publisher_info_db).unwrap();
            store.upsert_publisher(&PublisherInfo::new("a.com")).unwrap();
            store.set_excluded("b.com", true).unwrap();
            store
                .add_to_balance_report(Period::new(2026, 10), BalanceReportKind::Grant, Probi(5))
                .unwrap();
            let state = StateStore::new(&paths);
            state.save(StateBlob::Ledger, "{}").unwrap();
            state.save_confirmation("catalog", "x").unwrap();
        }

        let report = validate(dir.path());
        assert!(report.db_valid, "errors: {:?}", report.errors);
        assert_eq!(report.publishers, 2);
        assert_eq!(report.excluded_publishers, 1);
        assert_eq!(report.balance_reports, 1);
        assert!(report.ledger_state);
        assert!(!report.publisher_state);
        assert_eq!(report.confirmations, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_validate_missing_db() {
        let dir = tempfile::tempdir().unwrap();
        let report = validate(dir.path());
        assert!(!report.db_valid);
        assert!(report.errors[0].starts_with("Database not found"));
        assert!(!dir.path().join("publisher_info_db").exists());
    }

    #[test]
    fn test_validate_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("publisher_info_db");
        std::fs::create_dir_all(&db_dir).unwrap();
        let conn = Connection::open(db_dir.join(PUBLISHER_DB_FILE)).unwrap();
        conn.execute_batch("CREATE TABLE publisher_info (publisher_id TEXT PRIMARY KEY);")
            .unwrap();
        drop(conn);

        let report = validate(dir.path());
        assert!(!report.db_valid);
        assert!(report
            .errors
            .contains(&"Missing required table: balance_report".to_string()));
    }
}
