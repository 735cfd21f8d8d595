use rusqlite::{Connection, Result};
use tracing::debug;

/// Initialise the tasks projection. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_tasks_table(conn)?;
    migrate_tasks_table(conn);
    Ok(())
}

fn create_tasks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            task_id            TEXT PRIMARY KEY,
            trace_id           TEXT,
            provider           TEXT,
            model              TEXT,
            prompt_tokens      INTEGER NOT NULL DEFAULT 0,
            completion_tokens  INTEGER NOT NULL DEFAULT 0,
            total_tokens       INTEGER NOT NULL DEFAULT 0,
            cost_usd           REAL NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_created
            ON tasks(created_at);",
    )
}

/// Best-effort migration for databases created before cost attribution:
/// adds `provider`, `model`, and `cost_usd` when missing. Failures are
/// ignored; the column either exists already or the next startup retries.
fn migrate_tasks_table(conn: &Connection) {
    for (column, decl) in [
        ("provider", "TEXT"),
        ("model", "TEXT"),
        ("cost_usd", "REAL NOT NULL DEFAULT 0"),
    ] {
        if !has_column(conn, "tasks", column) {
            let sql = format!("ALTER TABLE tasks ADD COLUMN {column} {decl}");
            match conn.execute(&sql, []) {
                Ok(_) => debug!(column, "added tasks column"),
                Err(e) => debug!(column, err = %e, "tasks column migration skipped"),
            }
        }
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    let Ok(mut stmt) = conn.prepare(&format!("PRAGMA table_info({table})")) else {
        return false;
    };
    let Ok(mut rows) = stmt.query([]) else {
        return false;
    };
    while let Ok(Some(row)) = rows.next() {
        if row.get::<_, String>(1).map(|n| n == column).unwrap_or(false) {
            return true;
        }
    }
    false
}
