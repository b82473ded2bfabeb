//! SQLite publisher info database.
//!
//! Holds publisher identity and activity, media-key mappings, recurring
//! donations, contributions (settled and pending), and per-period balance
//! reports. Every write is an upsert or an append; publishers are never
//! deleted implicitly.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::schema::{CONTRIBUTION_SCHEMA_SQL, PUBLISHER_SCHEMA_SQL};
use crate::types::*;
use rewards_core::{Error, Period, Probi, Result, RewardsCategory};

/// Database file name inside the publisher info directory.
pub const PUBLISHER_DB_FILE: &str = "publisher_info.db";

/// Columns shared by every publisher query, in `row_to_publisher` order.
const PUBLISHER_COLUMNS: &str = "pi.publisher_id, pi.verified, pi.excluded, pi.name, \
     pi.favicon, pi.url, pi.provider, ai.duration, ai.visits, ai.score, ai.percent, \
     ai.weight, ai.reconcile_stamp, ai.last_visit, ai.category, ai.month, ai.year";

fn db(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Publisher store backed by a single SQLite connection.
pub struct PublisherStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl PublisherStore {
    /// Open or create the store. The file will be `db_dir/publisher_info.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join(PUBLISHER_DB_FILE);

        let conn = Connection::open(&db_path).map_err(db)?;
        Self::configure(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let stats = store.get_stats()?;
        info!(
            "PublisherStore initialized: {} publishers, {} balance reports, path={}",
            stats.publishers,
            stats.balance_reports,
            store.db_path.display()
        );
        Ok(store)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db)?;
        let full_schema = format!("{}\n{}", PUBLISHER_SCHEMA_SQL, CONTRIBUTION_SCHEMA_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Publisher info
    // ---------------------------------------------------------------

    /// Insert or update the identity fields of a publisher, keyed by id.
    pub fn upsert_publisher(&self, info: &PublisherInfo) -> Result<()> {
        if info.id.is_empty() {
            return Err(Error::InvalidState("publisher id is empty".into()));
        }
        let conn = self.conn.lock();
        Self::upsert_publisher_row(&conn, info)
    }

    fn upsert_publisher_row(conn: &Connection, info: &PublisherInfo) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO publisher_info (publisher_id, verified, excluded, name, favicon, url, provider) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(publisher_id) DO UPDATE SET \
                verified = excluded.verified, \
                excluded = excluded.excluded, \
                name = excluded.name, \
                favicon = excluded.favicon, \
                url = excluded.url, \
                provider = excluded.provider",
        )
        .map_err(db)?
        .execute(params![
            info.id,
            info.verified,
            info.excluded,
            info.name,
            info.favicon_url,
            info.url,
            info.provider,
        ])
        .map_err(db)?;
        Ok(())
    }

    /// Upsert identity and the activity row for `info.reconcile_stamp`.
    pub fn save_activity_info(&self, info: &PublisherInfo) -> Result<()> {
        if info.id.is_empty() {
            return Err(Error::InvalidState("publisher id is empty".into()));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db)?;
        Self::upsert_publisher_row(&tx, info)?;
        tx.prepare_cached(
            "INSERT INTO activity_info \
                (publisher_id, duration, visits, score, percent, weight, reconcile_stamp, \
                 last_visit, category, month, year) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(publisher_id, reconcile_stamp) DO UPDATE SET \
                duration = excluded.duration, \
                visits = excluded.visits, \
                score = excluded.score, \
                percent = excluded.percent, \
                weight = excluded.weight, \
                last_visit = excluded.last_visit, \
                category = excluded.category, \
                month = excluded.month, \
                year = excluded.year",
        )
        .map_err(db)?
        .execute(params![
            info.id,
            info.duration as i64,
            info.visits,
            info.score,
            info.percent,
            info.weight,
            info.reconcile_stamp as i64,
            info.last_visit as i64,
            info.category.as_i64(),
            info.month,
            info.year,
        ])
        .map_err(db)?;
        tx.commit().map_err(db)?;
        Ok(())
    }

    /// Publisher identity by key. `None` means the publisher was never saved.
    pub fn get_publisher(&self, publisher_id: &str) -> Result<Option<PublisherInfo>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM publisher_info AS pi \
             LEFT JOIN activity_info AS ai ON ai.publisher_id = pi.publisher_id AND 0 \
             WHERE pi.publisher_id = ?1",
            PUBLISHER_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db)?;
        let publisher = stmt
            .query_row(params![publisher_id], |row| Ok(Self::row_to_publisher(row)))
            .optional()
            .map_err(db)?;
        Ok(publisher)
    }

    /// Publisher identity joined with its activity for one reconcile stamp,
    /// as shown in the host's panel.
    pub fn get_panel_publisher(
        &self,
        publisher_id: &str,
        reconcile_stamp: u64,
    ) -> Result<Option<PublisherInfo>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM publisher_info AS pi \
             LEFT JOIN activity_info AS ai \
                ON ai.publisher_id = pi.publisher_id AND ai.reconcile_stamp = ?2 \
             WHERE pi.publisher_id = ?1",
            PUBLISHER_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db)?;
        let publisher = stmt
            .query_row(params![publisher_id, reconcile_stamp as i64], |row| {
                Ok(Self::row_to_publisher(row))
            })
            .optional()
            .map_err(db)?;
        Ok(publisher)
    }

    /// Paginated activity list. `limit == 0` returns every match.
    pub fn get_activity_list(
        &self,
        start: u32,
        limit: u32,
        filter: &ActivityInfoFilter,
    ) -> Result<PublisherPage> {
        let mut sql = format!(
            "SELECT {} FROM activity_info AS ai \
             INNER JOIN publisher_info AS pi ON ai.publisher_id = pi.publisher_id \
             WHERE 1 = 1",
            PUBLISHER_COLUMNS
        );
        let mut args: Vec<Value> = Vec::new();

        if let Some(id) = &filter.publisher_id {
            sql.push_str(" AND ai.publisher_id = ?");
            args.push(Value::Text(id.clone()));
        }
        if filter.reconcile_stamp > 0 {
            sql.push_str(" AND ai.reconcile_stamp = ?");
            args.push(Value::Integer(filter.reconcile_stamp as i64));
        }
        if filter.min_duration > 0 {
            sql.push_str(" AND ai.duration >= ?");
            args.push(Value::Integer(filter.min_duration as i64));
        }
        if filter.min_visits > 0 {
            sql.push_str(" AND ai.visits >= ?");
            args.push(Value::Integer(filter.min_visits as i64));
        }
        if filter.percent > 0 {
            sql.push_str(" AND ai.percent >= ?");
            args.push(Value::Integer(filter.percent as i64));
        }
        if !filter.non_verified {
            sql.push_str(" AND pi.verified = 1");
        }
        match filter.excluded {
            ExcludeFilter::Default => sql.push_str(" AND pi.excluded = 0"),
            ExcludeFilter::Excluded => sql.push_str(" AND pi.excluded = 1"),
            ExcludeFilter::All => {}
        }
        if let Some(after) = filter.visited_after {
            sql.push_str(" AND ai.last_visit >= ?");
            args.push(Value::Integer(after as i64));
        }
        if let Some(before) = filter.visited_before {
            sql.push_str(" AND ai.last_visit < ?");
            args.push(Value::Integer(before as i64));
        }
        if let Some(category) = filter.category {
            sql.push_str(" AND ai.category = ?");
            args.push(Value::Integer(category.as_i64()));
        }
        if let Some(period) = filter.period {
            sql.push_str(" AND ai.year = ? AND ai.month = ?");
            args.push(Value::Integer(period.year as i64));
            args.push(Value::Integer(period.month as i64));
        }

        if !filter.order_by.is_empty() {
            let keys: Vec<String> = filter
                .order_by
                .iter()
                .map(|(order, asc)| {
                    format!("{} {}", order.column(), if *asc { "ASC" } else { "DESC" })
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        if limit > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            args.push(Value::Integer(limit as i64));
            args.push(Value::Integer(start as i64));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(Self::row_to_publisher(row))
            })
            .map_err(db)?;
        let items: Vec<PublisherInfo> = rows.filter_map(|r| r.ok()).collect();

        let next_record = if limit > 0 && items.len() as u32 == limit {
            start + limit
        } else {
            0
        };
        debug!(
            "Activity list: start={} limit={} -> {} rows",
            start,
            limit,
            items.len()
        );
        Ok(PublisherPage { items, next_record })
    }

    // ---------------------------------------------------------------
    // Exclusion
    // ---------------------------------------------------------------

    /// Set the excluded flag, creating a bare publisher row if needed.
    pub fn set_excluded(&self, publisher_id: &str, excluded: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO publisher_info (publisher_id, excluded) VALUES (?1, ?2) \
             ON CONFLICT(publisher_id) DO UPDATE SET excluded = excluded.excluded",
        )
        .map_err(db)?
        .execute(params![publisher_id, excluded])
        .map_err(db)?;
        Ok(())
    }

    /// Clear every excluded flag. Returns how many publishers were restored.
    pub fn restore_publishers(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count = conn
            .execute("UPDATE publisher_info SET excluded = 0 WHERE excluded = 1", [])
            .map_err(db)?;
        info!("Restored {} excluded publishers", count);
        Ok(count)
    }

    pub fn count_excluded(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM publisher_info WHERE excluded = 1",
                [],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count as u32)
    }

    // ---------------------------------------------------------------
    // Media publishers
    // ---------------------------------------------------------------

    pub fn upsert_media_publisher(&self, media_key: &str, publisher_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO media_publisher_info (media_key, publisher_id) VALUES (?1, ?2) \
             ON CONFLICT(media_key) DO UPDATE SET publisher_id = excluded.publisher_id",
        )
        .map_err(db)?
        .execute(params![media_key, publisher_id])
        .map_err(db)?;
        Ok(())
    }

    /// Resolve a media key to its publisher's identity.
    pub fn get_media_publisher(&self, media_key: &str) -> Result<Option<PublisherInfo>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM media_publisher_info AS mpi \
             INNER JOIN publisher_info AS pi ON mpi.publisher_id = pi.publisher_id \
             LEFT JOIN activity_info AS ai ON ai.publisher_id = pi.publisher_id AND 0 \
             WHERE mpi.media_key = ?1",
            PUBLISHER_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db)?;
        let publisher = stmt
            .query_row(params![media_key], |row| Ok(Self::row_to_publisher(row)))
            .optional()
            .map_err(db)?;
        Ok(publisher)
    }

    // ---------------------------------------------------------------
    // Recurring donations
    // ---------------------------------------------------------------

    pub fn upsert_recurring(&self, publisher_id: &str, amount: f64, added_date: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO recurring_donation (publisher_id, amount, added_date) VALUES (?1, ?2, ?3) \
             ON CONFLICT(publisher_id) DO UPDATE SET amount = excluded.amount, added_date = excluded.added_date",
        )
        .map_err(db)?
        .execute(params![publisher_id, amount, added_date as i64])
        .map_err(db)?;
        Ok(())
    }

    /// Returns false when there was no recurring donation to remove.
    pub fn remove_recurring(&self, publisher_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "DELETE FROM recurring_donation WHERE publisher_id = ?1",
                params![publisher_id],
            )
            .map_err(db)?;
        Ok(count > 0)
    }

    pub fn get_recurring_donations(&self) -> Result<Vec<RecurringDonation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT rd.publisher_id, rd.amount, rd.added_date, pi.name, pi.url, \
                 pi.provider, pi.favicon, pi.verified \
                 FROM recurring_donation AS rd \
                 LEFT JOIN publisher_info AS pi ON rd.publisher_id = pi.publisher_id \
                 ORDER BY rd.added_date ASC",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RecurringDonation {
                    publisher_id: row.get(0).unwrap_or_default(),
                    amount: row.get(1).unwrap_or(0.0),
                    added_date: row.get::<_, i64>(2).unwrap_or(0) as u64,
                    name: row.get(3).unwrap_or_default(),
                    url: row.get(4).unwrap_or_default(),
                    provider: row.get(5).unwrap_or_default(),
                    favicon_url: row.get(6).unwrap_or_default(),
                    verified: row.get(7).unwrap_or(false),
                })
            })
            .map_err(db)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Contributions
    // ---------------------------------------------------------------

    /// Append a settled contribution. Returns its row id.
    pub fn save_contribution(&self, contribution: &ContributionInfo) -> Result<i64> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO contribution_info (publisher_id, probi, date, category, month, year) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(db)?;
        let id = stmt.insert(params![
            contribution.publisher_id,
            contribution.probi.to_string(),
            contribution.date as i64,
            contribution.category.as_i64(),
            contribution.month,
            contribution.year,
        ])
        .map_err(db)?;
        Ok(id)
    }

    pub fn list_contributions(&self, filter: &ContributionFilter) -> Result<Vec<ContributionInfo>> {
        let mut sql = String::from(
            "SELECT publisher_id, probi, date, category, month, year FROM contribution_info WHERE 1 = 1",
        );
        let mut args: Vec<Value> = Vec::new();
        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            args.push(Value::Integer(category.as_i64()));
        }
        if let Some(period) = filter.period {
            sql.push_str(" AND year = ? AND month = ?");
            args.push(Value::Integer(period.year as i64));
            args.push(Value::Integer(period.month as i64));
        }
        if let Some(id) = &filter.publisher_id {
            sql.push_str(" AND publisher_id = ?");
            args.push(Value::Text(id.clone()));
        }
        sql.push_str(" ORDER BY id ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let probi: String = row.get(1)?;
                let category: i64 = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    probi,
                    row.get::<_, i64>(2)?,
                    category,
                    row.get::<_, u32>(4)?,
                    row.get::<_, i32>(5)?,
                ))
            })
            .map_err(db)?;

        let mut out = Vec::new();
        for row in rows {
            let (publisher_id, probi, date, category, month, year) = row.map_err(db)?;
            let Some(category) = RewardsCategory::from_i64(category) else {
                debug!("Skipping contribution with unknown category {}", category);
                continue;
            };
            out.push(ContributionInfo {
                publisher_id,
                probi: Probi::parse_lenient(&probi)?,
                category,
                month,
                year,
                date: date.max(0) as u64,
            });
        }
        Ok(out)
    }

    /// One-time tips settled in `period`, newest first.
    pub fn get_one_time_tips(&self, period: Period) -> Result<Vec<TipRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT ci.publisher_id, ci.probi, ci.date, pi.name, pi.url, pi.provider, \
                 pi.favicon, pi.verified \
                 FROM contribution_info AS ci \
                 LEFT JOIN publisher_info AS pi ON ci.publisher_id = pi.publisher_id \
                 WHERE ci.category = ?1 AND ci.year = ?2 AND ci.month = ?3 \
                 ORDER BY ci.date DESC, ci.id DESC",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(
                params![RewardsCategory::OneTimeTip.as_i64(), period.year, period.month],
                |row| {
                    let probi: String = row.get(1)?;
                    let tip = TipRecord {
                        publisher_id: row.get(0)?,
                        probi: Probi::ZERO,
                        date: row.get::<_, i64>(2)?.max(0) as u64,
                        name: row.get(3).unwrap_or_default(),
                        url: row.get(4).unwrap_or_default(),
                        provider: row.get(5).unwrap_or_default(),
                        favicon_url: row.get(6).unwrap_or_default(),
                        verified: row.get(7).unwrap_or(false),
                    };
                    Ok((probi, tip))
                },
            )
            .map_err(db)?;

        let mut out = Vec::new();
        for row in rows {
            let (probi, mut tip) = row.map_err(db)?;
            tip.probi = Probi::parse_lenient(&probi)?;
            out.push(tip);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Pending contributions
    // ---------------------------------------------------------------

    /// Append pending contributions atomically. Returns the number stored.
    pub fn save_pending_contributions(&self, list: &[PendingContribution]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO pending_contribution \
                        (publisher_id, probi, added_date, viewing_id, category) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(db)?;
            for item in list {
                stmt.execute(params![
                    item.publisher_id,
                    item.probi.to_string(),
                    item.added_date as i64,
                    item.viewing_id,
                    item.category.as_i64(),
                ])
                .map_err(db)?;
            }
        }
        tx.commit().map_err(db)?;
        Ok(list.len())
    }

    pub fn list_pending_contributions(&self) -> Result<Vec<PendingContribution>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT publisher_id, probi, added_date, viewing_id, category \
                 FROM pending_contribution ORDER BY id ASC",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(db)?;

        let mut out = Vec::new();
        for row in rows {
            let (publisher_id, probi, added_date, viewing_id, category) = row.map_err(db)?;
            let Some(category) = RewardsCategory::from_i64(category) else {
                continue;
            };
            out.push(PendingContribution {
                publisher_id,
                probi: Probi::parse_lenient(&probi)?,
                category,
                viewing_id,
                added_date: added_date.max(0) as u64,
            });
        }
        Ok(out)
    }

    /// Sum of all pending contribution amounts.
    pub fn pending_contributions_total(&self) -> Result<Probi> {
        self.list_pending_contributions()?
            .iter()
            .try_fold(Probi::ZERO, |acc, p| acc.checked_add(p.probi))
            .ok_or_else(|| Error::InvalidState("pending total overflow".into()))
    }

    /// Drop pending entries settled under `viewing_id`.
    pub fn remove_pending_for_viewing(&self, viewing_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM pending_contribution WHERE viewing_id = ?1",
            params![viewing_id],
        )
        .map_err(db)
    }

    pub fn clear_pending_contributions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM pending_contribution", [])
            .map_err(db)
    }

    // ---------------------------------------------------------------
    // Balance reports
    // ---------------------------------------------------------------

    /// Add `amount` to one column of the period's report, creating the
    /// report if it does not exist. Returns the updated report.
    pub fn add_to_balance_report(
        &self,
        period: Period,
        kind: BalanceReportKind,
        amount: Probi,
    ) -> Result<BalanceReport> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db)?;

        let mut report =
            Self::read_balance_report(&tx, period)?.unwrap_or_else(|| BalanceReport::empty(period));
        let slot = report.slot_mut(kind);
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidState(format!("balance report overflow for {:?}", kind)))?;

        tx.prepare_cached(
            "INSERT INTO balance_report \
                (year, month, grants, earning_from_ads, auto_contribute, recurring_donation, one_time_donation) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(year, month) DO UPDATE SET \
                grants = excluded.grants, \
                earning_from_ads = excluded.earning_from_ads, \
                auto_contribute = excluded.auto_contribute, \
                recurring_donation = excluded.recurring_donation, \
                one_time_donation = excluded.one_time_donation",
        )
        .map_err(db)?
        .execute(params![
            period.year,
            period.month,
            report.grants.to_string(),
            report.earning_from_ads.to_string(),
            report.auto_contribute.to_string(),
            report.recurring_donation.to_string(),
            report.one_time_donation.to_string(),
        ])
        .map_err(db)?;
        tx.commit().map_err(db)?;

        debug!(
            "Balance report {} {:?} += {}",
            period.key(),
            kind,
            amount
        );
        Ok(report)
    }

    pub fn get_balance_report(&self, period: Period) -> Result<Option<BalanceReport>> {
        let conn = self.conn.lock();
        Self::read_balance_report(&conn, period)
    }

    /// All reports, oldest period first.
    pub fn get_all_balance_reports(&self) -> Result<Vec<BalanceReport>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT year, month, grants, earning_from_ads, auto_contribute, \
                 recurring_donation, one_time_donation FROM balance_report \
                 ORDER BY year ASC, month ASC",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([], Self::row_to_raw_report)
            .map_err(db)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::parse_report(row.map_err(db)?)?);
        }
        Ok(out)
    }

    fn read_balance_report(conn: &Connection, period: Period) -> Result<Option<BalanceReport>> {
        let raw = conn
            .prepare_cached(
                "SELECT year, month, grants, earning_from_ads, auto_contribute, \
                 recurring_donation, one_time_donation FROM balance_report \
                 WHERE year = ?1 AND month = ?2",
            )
            .map_err(db)?
            .query_row(params![period.year, period.month], Self::row_to_raw_report)
            .optional()
            .map_err(db)?;
        raw.map(Self::parse_report).transpose()
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db)
        };
        let stats = StoreStats {
            publishers: count("SELECT COUNT(*) FROM publisher_info")?,
            activity_rows: count("SELECT COUNT(*) FROM activity_info")?,
            excluded_publishers: count("SELECT COUNT(*) FROM publisher_info WHERE excluded = 1")?,
            media_publishers: count("SELECT COUNT(*) FROM media_publisher_info")?,
            recurring_donations: count("SELECT COUNT(*) FROM recurring_donation")?,
            contributions: count("SELECT COUNT(*) FROM contribution_info")?,
            pending_contributions: count("SELECT COUNT(*) FROM pending_contribution")?,
            balance_reports: count("SELECT COUNT(*) FROM balance_report")?,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: std::fs::metadata(&self.db_path)
                .map(|m| m.len())
                .unwrap_or(0) as f64
                / (1024.0 * 1024.0),
        };
        Ok(stats)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_publisher(row: &rusqlite::Row<'_>) -> PublisherInfo {
        PublisherInfo {
            id: row.get(0).unwrap_or_default(),
            verified: row.get(1).unwrap_or(false),
            excluded: row.get(2).unwrap_or(false),
            name: row.get(3).unwrap_or_default(),
            favicon_url: row.get(4).unwrap_or_default(),
            url: row.get(5).unwrap_or_default(),
            provider: row.get(6).unwrap_or_default(),
            duration: row.get::<_, i64>(7).unwrap_or(0).max(0) as u64,
            visits: row.get(8).unwrap_or(0),
            score: row.get(9).unwrap_or(0.0),
            percent: row.get(10).unwrap_or(0),
            weight: row.get(11).unwrap_or(0.0),
            reconcile_stamp: row.get::<_, i64>(12).unwrap_or(0).max(0) as u64,
            last_visit: row.get::<_, i64>(13).unwrap_or(0).max(0) as u64,
            category: row
                .get::<_, i64>(14)
                .ok()
                .and_then(RewardsCategory::from_i64)
                .unwrap_or_default(),
            month: row.get(15).unwrap_or(0),
            year: row.get(16).unwrap_or(0),
        }
    }

    #[allow(clippy::type_complexity)]
    fn row_to_raw_report(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i32, u32, [String; 5])> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            [
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ],
        ))
    }

    fn parse_report((year, month, amounts): (i32, u32, [String; 5])) -> Result<BalanceReport> {
        let [grants, ads, auto, recurring, one_time] = amounts;
        Ok(BalanceReport {
            period: Period::new(year, month),
            grants: Probi::parse_lenient(&grants)?,
            earning_from_ads: Probi::parse_lenient(&ads)?,
            auto_contribute: Probi::parse_lenient(&auto)?,
            recurring_donation: Probi::parse_lenient(&recurring)?,
            one_time_donation: Probi::parse_lenient(&one_time)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (PublisherStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PublisherStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn visit(id: &str, stamp: u64, duration: u64, visits: u32, score: f64) -> PublisherInfo {
        PublisherInfo {
            id: id.to_string(),
            name: id.to_string(),
            url: format!("https://{}", id),
            provider: String::new(),
            favicon_url: String::new(),
            verified: true,
            excluded: false,
            duration,
            visits,
            score,
            percent: 0,
            weight: 0.0,
            reconcile_stamp: stamp,
            last_visit: 1_000 + duration,
            category: RewardsCategory::AutoContribute,
            month: 10,
            year: 2026,
        }
    }

    #[test]
    fn test_upsert_same_key_keeps_one_record() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            let mut info = PublisherInfo::new("example.com");
            info.name = format!("Example {}", i);
            store.upsert_publisher(&info).unwrap();
        }
        assert_eq!(store.get_stats().unwrap().publishers, 1);
        let stored = store.get_publisher("example.com").unwrap().unwrap();
        assert_eq!(stored.name, "Example 4");
    }

    #[test]
    fn test_missing_publisher_is_none() {
        let (store, _dir) = test_store();
        assert!(store.get_publisher("nobody.org").unwrap().is_none());
        let page = store
            .get_activity_list(0, 10, &ActivityInfoFilter::default())
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_record, 0);
    }

    #[test]
    fn test_empty_id_rejected() {
        let (store, _dir) = test_store();
        assert!(store.upsert_publisher(&PublisherInfo::default()).is_err());
    }

    #[test]
    fn test_activity_upsert_per_stamp() {
        let (store, _dir) = test_store();
        store.save_activity_info(&visit("a.com", 100, 30, 1, 1.0)).unwrap();
        store.save_activity_info(&visit("a.com", 100, 60, 2, 2.0)).unwrap();
        store.save_activity_info(&visit("a.com", 200, 10, 1, 0.5)).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.publishers, 1);
        assert_eq!(stats.activity_rows, 2);

        let panel = store.get_panel_publisher("a.com", 100).unwrap().unwrap();
        assert_eq!(panel.duration, 60);
        assert_eq!(panel.visits, 2);

        let panel = store.get_panel_publisher("a.com", 999).unwrap().unwrap();
        assert_eq!(panel.duration, 0);
    }

    #[test]
    fn test_activity_filters_and_order() {
        let (store, _dir) = test_store();
        store.save_activity_info(&visit("a.com", 1, 10, 1, 1.0)).unwrap();
        store.save_activity_info(&visit("b.com", 1, 50, 5, 3.0)).unwrap();
        let mut unverified = visit("c.com", 1, 40, 4, 2.0);
        unverified.verified = false;
        store.save_activity_info(&unverified).unwrap();

        let filter = ActivityInfoFilter {
            min_duration: 20,
            order_by: vec![(ActivityOrder::Score, false)],
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &filter).unwrap();
        let ids: Vec<_> = page.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b.com", "c.com"]);

        let verified_only = ActivityInfoFilter {
            non_verified: false,
            min_visits: 2,
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &verified_only).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "b.com");

        let recent = ActivityInfoFilter {
            visited_after: Some(1_040),
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &recent).unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_activity_category_and_period_filter() {
        let (store, _dir) = test_store();
        store.save_activity_info(&visit("a.com", 1, 10, 1, 1.0)).unwrap();
        let mut tipped = visit("b.com", 1, 20, 2, 2.0);
        tipped.category = RewardsCategory::OneTimeTip;
        store.save_activity_info(&tipped).unwrap();
        let mut last_month = visit("c.com", 1, 30, 3, 3.0);
        last_month.month = 9;
        store.save_activity_info(&last_month).unwrap();

        let auto = ActivityInfoFilter {
            category: Some(RewardsCategory::AutoContribute),
            order_by: vec![(ActivityOrder::Duration, true)],
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &auto).unwrap();
        let ids: Vec<_> = page.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a.com", "c.com"]);

        let october = ActivityInfoFilter {
            category: Some(RewardsCategory::AutoContribute),
            period: Some(Period::new(2026, 10)),
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &october).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "a.com");
        assert_eq!(page.items[0].month, 10);

        let tips = ActivityInfoFilter {
            category: Some(RewardsCategory::OneTimeTip),
            ..Default::default()
        };
        let page = store.get_activity_list(0, 0, &tips).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].category, RewardsCategory::OneTimeTip);
    }

    #[test]
    fn test_pagination_next_record() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store
                .save_activity_info(&visit(&format!("site{}.com", i), 1, 10 + i, 1, i as f64))
                .unwrap();
        }
        let filter = ActivityInfoFilter {
            order_by: vec![(ActivityOrder::Duration, true)],
            ..Default::default()
        };
        let first = store.get_activity_list(0, 2, &filter).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_record, 2);

        let last = store.get_activity_list(4, 2, &filter).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_record, 0);
    }

    #[test]
    fn test_exclude_and_restore() {
        let (store, _dir) = test_store();
        store.save_activity_info(&visit("a.com", 1, 10, 1, 1.0)).unwrap();
        store.save_activity_info(&visit("b.com", 1, 10, 1, 1.0)).unwrap();

        store.set_excluded("a.com", true).unwrap();
        store.set_excluded("b.com", true).unwrap();
        assert_eq!(store.count_excluded().unwrap(), 2);

        let page = store
            .get_activity_list(0, 0, &ActivityInfoFilter::default())
            .unwrap();
        assert!(page.items.is_empty());

        assert_eq!(store.restore_publishers().unwrap(), 2);
        assert_eq!(store.count_excluded().unwrap(), 0);
        assert!(!store.get_publisher("a.com").unwrap().unwrap().excluded);
        assert_eq!(store.restore_publishers().unwrap(), 0);
    }

    #[test]
    fn test_media_publisher_lookup() {
        let (store, _dir) = test_store();
        store.upsert_publisher(&PublisherInfo::new("youtube#channel:abc")).unwrap();
        store
            .upsert_media_publisher("youtube_video123", "youtube#channel:abc")
            .unwrap();
        store
            .upsert_media_publisher("youtube_video456", "youtube#channel:abc")
            .unwrap();

        let info = store.get_media_publisher("youtube_video123").unwrap().unwrap();
        assert_eq!(info.id, "youtube#channel:abc");
        assert!(store.get_media_publisher("unknown").unwrap().is_none());
        assert_eq!(store.get_stats().unwrap().media_publishers, 2);
    }

    #[test]
    fn test_recurring_donations() {
        let (store, _dir) = test_store();
        store.upsert_publisher(&PublisherInfo::new("example.com")).unwrap();
        store.upsert_recurring("example.com", 5.0, 10).unwrap();
        store.upsert_recurring("example.com", 10.0, 20).unwrap();
        store.upsert_recurring("ghost.org", 1.0, 30).unwrap();

        let list = store.get_recurring_donations().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].publisher_id, "example.com");
        assert_eq!(list[0].amount, 10.0);
        assert_eq!(list[1].name, "");

        assert!(store.remove_recurring("ghost.org").unwrap());
        assert!(!store.remove_recurring("ghost.org").unwrap());
    }

    #[test]
    fn test_contributions_filtered() {
        let (store, _dir) = test_store();
        let base = ContributionInfo {
            publisher_id: "example.com".into(),
            probi: Probi(1000),
            category: RewardsCategory::RecurringTip,
            month: 10,
            year: 2026,
            date: 1,
        };
        store.save_contribution(&base).unwrap();
        store
            .save_contribution(&ContributionInfo {
                category: RewardsCategory::OneTimeTip,
                ..base.clone()
            })
            .unwrap();

        let filter = ContributionFilter {
            category: Some(RewardsCategory::RecurringTip),
            period: Some(Period::new(2026, 10)),
            publisher_id: None,
        };
        let list = store.list_contributions(&filter).unwrap();
        assert_eq!(list, vec![base]);
        assert_eq!(store.list_contributions(&Default::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_one_time_tips_for_period() {
        let (store, _dir) = test_store();
        let mut info = PublisherInfo::new("example.com");
        info.name = "Example".into();
        store.upsert_publisher(&info).unwrap();

        let tip = |id: &str, category: RewardsCategory, month: u32, date: u64| ContributionInfo {
            publisher_id: id.into(),
            probi: Probi(250),
            category,
            month,
            year: 2026,
            date,
        };
        store
            .save_contribution(&tip("example.com", RewardsCategory::OneTimeTip, 10, 1))
            .unwrap();
        store
            .save_contribution(&tip("ghost.org", RewardsCategory::OneTimeTip, 10, 2))
            .unwrap();
        store
            .save_contribution(&tip("example.com", RewardsCategory::RecurringTip, 10, 3))
            .unwrap();
        store
            .save_contribution(&tip("example.com", RewardsCategory::OneTimeTip, 9, 4))
            .unwrap();

        let tips = store.get_one_time_tips(Period::new(2026, 10)).unwrap();
        let ids: Vec<_> = tips.iter().map(|t| t.publisher_id.as_str()).collect();
        assert_eq!(ids, vec!["ghost.org", "example.com"]);
        assert_eq!(tips[1].name, "Example");
        assert_eq!(tips[1].probi, Probi(250));
        assert_eq!(tips[0].name, "");
        assert!(store.get_one_time_tips(Period::new(2026, 8)).unwrap().is_empty());
    }

    #[test]
    fn test_pending_contributions() {
        let (store, _dir) = test_store();
        let pending = |id: &str, probi: u128, viewing: &str| PendingContribution {
            publisher_id: id.into(),
            probi: Probi(probi),
            category: RewardsCategory::OneTimeTip,
            viewing_id: viewing.into(),
            added_date: 5,
        };
        store
            .save_pending_contributions(&[pending("a.com", 100, "v1"), pending("b.com", 250, "v2")])
            .unwrap();
        assert_eq!(store.pending_contributions_total().unwrap(), Probi(350));

        assert_eq!(store.remove_pending_for_viewing("v1").unwrap(), 1);
        assert_eq!(store.list_pending_contributions().unwrap().len(), 1);
        assert_eq!(store.clear_pending_contributions().unwrap(), 1);
        assert_eq!(store.pending_contributions_total().unwrap(), Probi::ZERO);
    }

    #[test]
    fn test_balance_report_is_additive() {
        let (store, _dir) = test_store();
        let period = Period::new(2026, 10);
        store
            .add_to_balance_report(period, BalanceReportKind::RecurringDonation, Probi(1000))
            .unwrap();
        store
            .add_to_balance_report(period, BalanceReportKind::OneTimeDonation, Probi(500))
            .unwrap();
        let report = store
            .add_to_balance_report(period, BalanceReportKind::RecurringDonation, Probi(1000))
            .unwrap();
        assert_eq!(report.recurring_donation, Probi(2000));
        assert_eq!(report.one_time_donation, Probi(500));

        let stored = store.get_balance_report(period).unwrap().unwrap();
        assert_eq!(stored, report);
        assert!(store.get_balance_report(Period::new(2026, 9)).unwrap().is_none());
        assert_eq!(store.get_all_balance_reports().unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_store() {
        let store = PublisherStore::open_in_memory().unwrap();
        store.upsert_publisher(&PublisherInfo::new("a.com")).unwrap();
        assert!(store.get_publisher("a.com").unwrap().is_some());
    }
}
