use std::collections::BTreeMap;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::error::{Result, UsageError};

/// One row of the per-provider, per-day trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummaryRow {
    pub provider: String,
    pub day: String,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Thread-safe store over the tasks projection.
///
/// Wraps a single SQLite connection in a `Mutex`; the atomic update below is
/// one SQL statement, so first-write-wins pinning is enforced by the storage
/// layer rather than read-then-write application code.
pub struct UsageStore {
    db: Mutex<Connection>,
}

impl UsageStore {
    /// Wrap an already-open connection and ensure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Accumulate one completed call into a task row.
    ///
    /// `provider` and `model` are written only when currently null — a task
    /// stays pinned to the backend that served its first call even if later
    /// calls were rerouted. Token counts and cost accumulate.
    #[instrument(skip(self), fields(task_id = %task_id, provider = %provider, model = %model))]
    pub fn update_task_usage(
        &self,
        task_id: &str,
        trace_id: &str,
        provider: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost_usd: f64,
    ) -> Result<()> {
        let total = prompt_tokens + completion_tokens;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tasks
                (task_id, trace_id, provider, model,
                 prompt_tokens, completion_tokens, total_tokens, cost_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(task_id) DO UPDATE SET
                provider          = COALESCE(provider, excluded.provider),
                model             = COALESCE(model, excluded.model),
                prompt_tokens     = prompt_tokens     + excluded.prompt_tokens,
                completion_tokens = completion_tokens + excluded.completion_tokens,
                total_tokens      = total_tokens      + excluded.total_tokens,
                cost_usd          = cost_usd          + excluded.cost_usd",
            rusqlite::params![
                task_id,
                trace_id,
                provider,
                model,
                prompt_tokens as i64,
                completion_tokens as i64,
                total as i64,
                cost_usd,
                now
            ],
        )?;
        Ok(())
    }

    /// Best-effort variant used on the hot path: a failed write is logged
    /// and never fails the chat request.
    pub fn record(
        &self,
        task_id: &str,
        trace_id: &str,
        provider: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost_usd: f64,
    ) {
        if let Err(e) = self.update_task_usage(
            task_id,
            trace_id,
            provider,
            model,
            prompt_tokens,
            completion_tokens,
            cost_usd,
        ) {
            warn!(task_id, err = %e, "usage update failed, continuing");
        }
    }

    /// Token totals per provider for the current calendar day, server local
    /// time.
    pub fn daily_usage_by_provider(&self) -> Result<BTreeMap<String, u64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT COALESCE(provider, 'unknown'), SUM(total_tokens)
             FROM tasks
             WHERE date(created_at, 'localtime') = date('now', 'localtime')
             GROUP BY COALESCE(provider, 'unknown')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut totals = BTreeMap::new();
        for row in rows {
            let (provider, tokens) = row?;
            totals.insert(provider, tokens);
        }
        Ok(totals)
    }

    /// Per-provider, per-day rows for the last `days` days, newest first.
    pub fn usage_summary(&self, days: u32) -> Result<Vec<DailySummaryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT COALESCE(provider, 'unknown') AS p,
                    date(created_at, 'localtime') AS day,
                    SUM(total_tokens),
                    SUM(cost_usd)
             FROM tasks
             WHERE date(created_at, 'localtime')
                   > date('now', 'localtime', '-' || ?1 || ' days')
             GROUP BY p, day
             ORDER BY day DESC, p ASC",
        )?;
        let rows = stmt.query_map([days], |row| {
            Ok(DailySummaryRow {
                provider: row.get(0)?,
                day: row.get(1)?,
                tokens: row.get::<_, i64>(2)? as u64,
                cost_usd: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Refuse before the network call when today's tokens already exceed
    /// the configured limit. `None` disables the check.
    pub fn check_daily_quota(&self, limit: Option<u64>) -> Result<()> {
        let Some(limit) = limit else {
            return Ok(());
        };
        let used: u64 = self.daily_usage_by_provider()?.values().sum();
        if used >= limit {
            return Err(UsageError::QuotaExceeded { used, limit });
        }
        Ok(())
    }

    /// Provider/model/cost of one task row, for tests and diagnostics.
    pub fn task_row(
        &self,
        task_id: &str,
    ) -> Result<Option<(Option<String>, Option<String>, u64, f64)>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT provider, model, total_tokens, cost_usd FROM tasks WHERE task_id = ?1",
            rusqlite::params![task_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)? as u64,
                    row.get::<_, f64>(3)?,
                ))
            },
        ) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UsageStore {
        UsageStore::open_in_memory().unwrap()
    }

    #[test]
    fn first_update_pins_provider_and_model() {
        let store = store();
        store
            .update_task_usage("t1", "tr1", "claude", "claude-sonnet-4-5", 2000, 500, 0.0135)
            .unwrap();
        let (provider, model, tokens, cost) = store.task_row("t1").unwrap().unwrap();
        assert_eq!(provider.as_deref(), Some("claude"));
        assert_eq!(model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(tokens, 2500);
        assert!((cost - 0.0135).abs() < 1e-12);
    }

    #[test]
    fn provider_pinning_survives_rerouted_updates() {
        let store = store();
        store
            .update_task_usage("t1", "tr1", "claude", "claude-sonnet-4-5", 100, 50, 0.001)
            .unwrap();
        // a later call on the same task lands on a fallback provider
        store
            .update_task_usage("t1", "tr1", "openai", "gpt-4o", 10, 5, 0.002)
            .unwrap();
        let (provider, model, tokens, cost) = store.task_row("t1").unwrap().unwrap();
        assert_eq!(provider.as_deref(), Some("claude"));
        assert_eq!(model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(tokens, 165);
        assert!((cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn null_provider_row_is_claimed_by_first_usage_update() {
        let store = store();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO tasks (task_id, trace_id, created_at)
                 VALUES ('t1', 'tr1', ?1)",
                rusqlite::params![chrono::Utc::now().to_rfc3339()],
            )
            .unwrap();
        }
        store
            .update_task_usage("t1", "tr1", "groq", "llama-3.3-70b-versatile", 7, 3, 0.0)
            .unwrap();
        let (provider, _, tokens, _) = store.task_row("t1").unwrap().unwrap();
        assert_eq!(provider.as_deref(), Some("groq"));
        assert_eq!(tokens, 10);
    }

    #[test]
    fn daily_totals_group_by_provider() {
        let store = store();
        store.update_task_usage("t1", "a", "claude", "m", 100, 50, 0.0).unwrap();
        store.update_task_usage("t2", "b", "claude", "m", 10, 5, 0.0).unwrap();
        store.update_task_usage("t3", "c", "groq", "m", 1, 1, 0.0).unwrap();

        let totals = store.daily_usage_by_provider().unwrap();
        assert_eq!(totals["claude"], 165);
        assert_eq!(totals["groq"], 2);
    }

    #[test]
    fn quota_check_refuses_at_the_limit() {
        let store = store();
        store.update_task_usage("t1", "a", "claude", "m", 900, 100, 0.0).unwrap();

        assert!(store.check_daily_quota(None).is_ok());
        assert!(store.check_daily_quota(Some(2000)).is_ok());
        match store.check_daily_quota(Some(1000)) {
            Err(UsageError::QuotaExceeded { used, limit }) => {
                assert_eq!(used, 1000);
                assert_eq!(limit, 1000);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[test]
    fn summary_orders_newest_first() {
        let store = store();
        {
            let db = store.db.lock().unwrap();
            let yesterday = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
            db.execute(
                "INSERT INTO tasks (task_id, trace_id, provider, model,
                    prompt_tokens, completion_tokens, total_tokens, cost_usd, created_at)
                 VALUES ('old', 'tr', 'claude', 'm', 5, 5, 10, 0.5, ?1)",
                rusqlite::params![yesterday],
            )
            .unwrap();
        }
        store.update_task_usage("new", "tr", "claude", "m", 50, 50, 1.5).unwrap();

        let summary = store.usage_summary(7).unwrap();
        assert_eq!(summary.len(), 2);
        assert!(summary[0].day > summary[1].day);
        assert_eq!(summary[0].tokens, 100);
        assert_eq!(summary[1].tokens, 10);
    }

    #[test]
    fn summary_window_excludes_older_days() {
        let store = store();
        {
            let db = store.db.lock().unwrap();
            let last_month = (chrono::Utc::now() - chrono::Duration::days(30)).to_rfc3339();
            db.execute(
                "INSERT INTO tasks (task_id, trace_id, provider, model,
                    prompt_tokens, completion_tokens, total_tokens, cost_usd, created_at)
                 VALUES ('ancient', 'tr', 'claude', 'm', 5, 5, 10, 0.5, ?1)",
                rusqlite::params![last_month],
            )
            .unwrap();
        }
        store.update_task_usage("recent", "tr", "groq", "m", 1, 1, 0.0).unwrap();

        let summary = store.usage_summary(7).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].provider, "groq");
    }

    #[test]
    fn write_failure_on_record_does_not_panic() {
        let store = store();
        {
            let db = store.db.lock().unwrap();
            db.execute_batch("DROP TABLE tasks").unwrap();
        }
        // best-effort path: logs and returns
        store.record("t1", "tr", "claude", "m", 1, 1, 0.0);
    }
}
