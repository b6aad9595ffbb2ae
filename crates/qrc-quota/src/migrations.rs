use rusqlite::Connection;

struct Migration {
    version: u32,
    up_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up_sql: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                plan TEXT NOT NULL DEFAULT 'free',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS quota_periods (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                period_end INTEGER NOT NULL,
                daily_exports INTEGER NOT NULL DEFAULT 0 CHECK (daily_exports >= 0),
                daily_reset_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(account_id, period_start)
            );
            CREATE INDEX IF NOT EXISTS idx_quota_periods_lookup
                ON quota_periods(account_id, period_start, period_end);
            CREATE TABLE IF NOT EXISTS quota_counters (
                period_id INTEGER NOT NULL REFERENCES quota_periods(id),
                counter TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0 CHECK (value >= 0),
                PRIMARY KEY (period_id, counter)
            );
        "#,
}];

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);")?;

    let current_version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!("Running quota migration v{}", migration.version);
            conn.execute_batch(migration.up_sql)?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn period_rows_are_unique_per_account_and_start() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO quota_periods (account_id, period_start, period_end, daily_reset_at, created_at)
                      VALUES ('a', 100, 200, 100, 100)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
