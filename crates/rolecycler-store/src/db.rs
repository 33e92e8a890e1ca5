use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// Create the rotation tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rotation_domains (
            domain_id   INTEGER PRIMARY KEY,
            snapshot    TEXT NOT NULL,
            version     INTEGER NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS rotation_runs (
            run_id      TEXT PRIMARY KEY,
            domain_id   INTEGER NOT NULL,
            run_trigger TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            report      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rotation_runs_domain
            ON rotation_runs(domain_id, started_at DESC);
        CREATE TABLE IF NOT EXISTS status_assignments (
            domain_id   INTEGER NOT NULL,
            member_id   INTEGER NOT NULL,
            status_id   INTEGER NOT NULL,
            granted_at  TEXT NOT NULL,
            PRIMARY KEY (domain_id, member_id)
        );
        -- one row per domain while some process is mutating it
        CREATE TABLE IF NOT EXISTS run_leases (
            domain_id   INTEGER PRIMARY KEY,
            owner       TEXT NOT NULL,
            expires_at  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// Open (or create) the database file, switch it to WAL and create the schema.
///
/// Several connections (and processes) share the file, so writers wait up
/// to five seconds for each other instead of failing with `SQLITE_BUSY`.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    init_db(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('rotation_domains', 'rotation_runs', 'status_assignments', 'run_leases')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rc.db");
        let conn = open(path.to_str().unwrap()).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        assert!(path.exists());
    }
}
