//! Schema provisioning.
//!
//! Migrations are applied in order inside one transaction each and recorded
//! in `schema_version`, so opening an existing database is a no-op.

use rusqlite::{Connection, params};

struct Migration {
    version: i64,
    description: &'static str,
    up_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "users and messages",
    up_sql: r#"
        CREATE TABLE IF NOT EXISTS users (
            phone_number TEXT PRIMARY KEY NOT NULL,
            username     TEXT NOT NULL,
            password     BLOB NOT NULL,
            salt         BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            sender    TEXT NOT NULL,
            receiver  TEXT NOT NULL,
            content   TEXT NOT NULL,
            timestamp INTEGER NOT NULL   -- unix millis, UTC
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair_time
            ON messages (sender, receiver, timestamp);
    "#,
}];

/// Applies every migration newer than the recorded schema version.
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_twice_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_migrate_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        for table in ["users", "messages"] {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(found, 1, "table {table} should exist");
        }
    }
}
