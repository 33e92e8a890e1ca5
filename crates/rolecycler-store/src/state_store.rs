use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rolecycler_core::DomainId;
use rolecycler_rotation::{DomainState, PersistError, RunReport, StateStore};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};

/// Domain snapshots, run history and run leases in SQLite.
///
/// Each snapshot is one row replaced by a single upsert, so a commit is
/// atomic without an explicit transaction. Leases live in `run_leases` and
/// are taken with a conditional upsert, which serialises engines in
/// different processes that open the same file.
pub struct SqliteStateStore {
    db: Mutex<Connection>,
    history_limit: usize,
}

impl SqliteStateStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    /// Run history is kept in full until [`with_history_limit`](Self::with_history_limit).
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            history_limit: 0,
        }
    }

    /// Keep only the newest `limit` runs per domain; 0 keeps everything.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    #[instrument(skip(self), fields(domain = %domain))]
    pub fn load_snapshot(&self, domain: DomainId) -> Result<Option<DomainState>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row(
                "SELECT snapshot FROM rotation_domains WHERE domain_id = ?1",
                rusqlite::params![domain.get() as i64],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    #[instrument(skip(self, state), fields(domain = %state.domain))]
    pub fn save_snapshot(&self, state: &DomainState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO rotation_domains (domain_id, snapshot, version, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(domain_id) DO UPDATE SET
                 snapshot   = excluded.snapshot,
                 version    = excluded.version,
                 updated_at = excluded.updated_at",
            rusqlite::params![state.domain.get() as i64, json, state.version, now],
        )?;
        debug!("snapshot saved");
        Ok(())
    }

    /// Ids of every stored domain, ascending.
    pub fn domains(&self) -> Result<Vec<DomainId>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT domain_id FROM rotation_domains ORDER BY domain_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|id| DomainId(id as u64))
            .collect())
    }

    #[instrument(skip(self, report), fields(domain = %report.domain, run_id = %report.run_id))]
    pub fn append_run(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string(report)?;
        let trigger = serde_json::to_value(report.trigger)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let db = self.conn()?;
        let tx = db.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO rotation_runs (run_id, domain_id, run_trigger, started_at, report)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                report.run_id.to_string(),
                report.domain.get() as i64,
                trigger,
                report.started_at.to_rfc3339(),
                json
            ],
        )?;
        if self.history_limit > 0 {
            let pruned = tx.execute(
                "DELETE FROM rotation_runs
                 WHERE domain_id = ?1
                   AND run_id NOT IN (
                       SELECT run_id FROM rotation_runs
                       WHERE domain_id = ?1
                       ORDER BY started_at DESC, run_id DESC
                       LIMIT ?2)",
                rusqlite::params![report.domain.get() as i64, self.history_limit as i64],
            )?;
            if pruned > 0 {
                debug!(pruned, "old run reports pruned");
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Take or renew the run lease on `domain`. Fails (returns `false`) only
    /// while another owner's lease is unexpired.
    #[instrument(skip(self), fields(domain = %domain))]
    pub fn try_lease(&self, domain: DomainId, owner: &str, ttl: Duration) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let db = self.conn()?;
        let changed = db.execute(
            "INSERT INTO run_leases (domain_id, owner, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(domain_id) DO UPDATE SET
                 owner      = excluded.owner,
                 expires_at = excluded.expires_at
             WHERE run_leases.owner = excluded.owner
                OR run_leases.expires_at <= ?4",
            rusqlite::params![domain.get() as i64, owner, now.saturating_add(ttl_ms), now],
        )?;
        Ok(changed == 1)
    }

    pub fn release(&self, domain: DomainId, owner: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "DELETE FROM run_leases WHERE domain_id = ?1 AND owner = ?2",
            rusqlite::params![domain.get() as i64, owner],
        )?;
        Ok(())
    }

    /// Whether an unexpired lease exists on `domain`.
    pub fn is_leased(&self, domain: DomainId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM run_leases WHERE domain_id = ?1 AND expires_at > ?2",
            rusqlite::params![domain.get() as i64, now],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Most recent runs for a domain, newest first.
    pub fn recent_runs(&self, domain: DomainId, limit: usize) -> Result<Vec<RunReport>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT report FROM rotation_runs
             WHERE domain_id = ?1
             ORDER BY started_at DESC, run_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![domain.get() as i64, limit as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, domain: DomainId) -> std::result::Result<Option<DomainState>, PersistError> {
        self.load_snapshot(domain)
            .map_err(|e| PersistError(e.to_string()))
    }

    async fn persist(&self, state: &DomainState) -> std::result::Result<(), PersistError> {
        self.save_snapshot(state)
            .map_err(|e| PersistError(e.to_string()))
    }

    async fn record_run(&self, report: &RunReport) -> std::result::Result<(), PersistError> {
        self.append_run(report)
            .map_err(|e| PersistError(e.to_string()))
    }

    async fn acquire_lease(
        &self,
        domain: DomainId,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, PersistError> {
        self.try_lease(domain, owner, ttl)
            .map_err(|e| PersistError(e.to_string()))
    }

    async fn release_lease(&self, domain: DomainId, owner: &str) -> std::result::Result<(), PersistError> {
        self.release(domain, owner)
            .map_err(|e| PersistError(e.to_string()))
    }

    async fn lease_held(&self, domain: DomainId) -> std::result::Result<bool, PersistError> {
        self.is_leased(domain)
            .map_err(|e| PersistError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::{TimeZone, Utc};
    use rolecycler_core::MemberId;
    use rolecycler_rotation::RunTrigger;
    use rolecycler_scheduler::ScheduleDescription;
    use uuid::Uuid;

    fn store() -> SqliteStateStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        SqliteStateStore::new(conn)
    }

    #[test]
    fn missing_domain_loads_as_none() {
        assert!(store().load_snapshot(DomainId(1)).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_snapshot() {
        let s = store();
        let mut state = DomainState::new(DomainId(7), ScheduleDescription::default(), 2);
        s.save_snapshot(&state).unwrap();

        state.holders.insert(MemberId(3));
        state.run_count = 1;
        s.save_snapshot(&state).unwrap();

        assert_eq!(s.load_snapshot(DomainId(7)).unwrap(), Some(state));
        assert_eq!(s.domains().unwrap(), vec![DomainId(7)]);
    }

    fn report(domain: u64, minute: u32) -> RunReport {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, minute, 0).unwrap();
        RunReport {
            run_id: Uuid::new_v4(),
            domain: DomainId(domain),
            trigger: RunTrigger::Scheduled,
            started_at: at,
            finished_at: at,
            picked: vec![MemberId(1)],
            granted: vec![MemberId(1)],
            revoked: vec![],
            failures: vec![],
            under_supply: None,
            started_new_cycle: false,
            next_run: None,
            schedule_issue: None,
        }
    }

    #[test]
    fn history_is_pruned_per_domain() {
        let s = store().with_history_limit(3);
        for minute in 0..5 {
            s.append_run(&report(1, minute)).unwrap();
        }
        s.append_run(&report(2, 0)).unwrap();

        let kept = s.recent_runs(DomainId(1), 10).unwrap();
        let minutes: Vec<_> = kept.iter().map(|r| r.started_at.format("%M").to_string()).collect();
        assert_eq!(minutes, vec!["04", "03", "02"]);
        assert_eq!(s.recent_runs(DomainId(2), 10).unwrap().len(), 1);
    }

    #[test]
    fn unlimited_history_keeps_everything() {
        let s = store();
        for minute in 0..5 {
            s.append_run(&report(1, minute)).unwrap();
        }
        assert_eq!(s.recent_runs(DomainId(1), 10).unwrap().len(), 5);
    }

    #[test]
    fn lease_excludes_other_owners_until_released() {
        let s = store();
        let d = DomainId(4);
        let ttl = Duration::from_secs(60);
        assert!(!s.is_leased(d).unwrap());

        assert!(s.try_lease(d, "serve", ttl).unwrap());
        assert!(s.is_leased(d).unwrap());
        assert!(!s.try_lease(d, "cli", ttl).unwrap());
        // The holder may renew.
        assert!(s.try_lease(d, "serve", ttl).unwrap());

        // Only the holder can release.
        s.release(d, "cli").unwrap();
        assert!(s.is_leased(d).unwrap());
        s.release(d, "serve").unwrap();
        assert!(!s.is_leased(d).unwrap());
        assert!(s.try_lease(d, "cli", ttl).unwrap());

        // Leases are per domain.
        assert!(s.try_lease(DomainId(5), "serve", ttl).unwrap());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let s = store();
        let d = DomainId(4);
        // A crashed holder with a zero-length lease.
        assert!(s.try_lease(d, "crashed", Duration::ZERO).unwrap());
        assert!(!s.is_leased(d).unwrap());
        assert!(s.try_lease(d, "serve", Duration::from_secs(60)).unwrap());
        assert!(!s.try_lease(d, "crashed", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn corrupt_snapshot_is_an_error_not_a_panic() {
        let s = store();
        s.conn()
            .unwrap()
            .execute(
                "INSERT INTO rotation_domains VALUES (1, 'not json', 1, 'now')",
                [],
            )
            .unwrap();
        assert!(matches!(
            s.load_snapshot(DomainId(1)),
            Err(StoreError::Serialization(_))
        ));
    }
}
