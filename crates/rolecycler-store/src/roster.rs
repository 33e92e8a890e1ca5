use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rolecycler_core::config::DomainConfig;
use rolecycler_core::{DomainId, MemberId};
use rolecycler_rotation::{CollaboratorError, Membership};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Membership backed by the configured roster, with assignments kept in the
/// `status_assignments` table.
///
/// The eligibility pool of a domain is its `members` list. A domain whose
/// `eligible_role` or `assigned_role` is 0 is treated as unconfigured.
pub struct RosterMembership {
    db: Mutex<Connection>,
    domains: HashMap<DomainId, DomainConfig>,
    pacing: Duration,
}

impl RosterMembership {
    pub fn new(conn: Connection, domains: &[DomainConfig], pacing: Duration) -> Self {
        Self {
            db: Mutex::new(conn),
            domains: domains.iter().map(|d| (d.id, d.clone())).collect(),
            pacing,
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn configured(&self, domain: DomainId) -> std::result::Result<&DomainConfig, CollaboratorError> {
        let cfg = self.domains.get(&domain).ok_or_else(|| {
            CollaboratorError::Unconfigured(format!("domain {domain} is not in the roster"))
        })?;
        if cfg.eligible_role == 0 {
            return Err(CollaboratorError::Unconfigured(format!(
                "eligible role is not set for domain {domain}"
            )));
        }
        if cfg.assigned_role == 0 {
            return Err(CollaboratorError::Unconfigured(format!(
                "assigned role is not set for domain {domain}"
            )));
        }
        Ok(cfg)
    }

    /// Members currently recorded with the assigned status.
    pub fn assignments(&self, domain: DomainId) -> Result<BTreeSet<MemberId>> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT member_id FROM status_assignments WHERE domain_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![domain.get() as i64], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|id| MemberId(id as u64))
            .collect())
    }
}

fn call_err(e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Call(e.to_string())
}

#[async_trait]
impl Membership for RosterMembership {
    async fn resolve_eligibility_pool(
        &self,
        domain: DomainId,
    ) -> std::result::Result<BTreeSet<MemberId>, CollaboratorError> {
        let cfg = self.configured(domain)?;
        Ok(cfg.members.iter().copied().collect())
    }

    async fn grant_status(
        &self,
        domain: DomainId,
        member: MemberId,
    ) -> std::result::Result<(), CollaboratorError> {
        let cfg = self.configured(domain)?;
        if !cfg.members.contains(&member) {
            return Err(CollaboratorError::Call(format!(
                "member {member} is not in the roster of domain {domain}"
            )));
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.conn().map_err(call_err)?;
        db.execute(
            "INSERT OR REPLACE INTO status_assignments (domain_id, member_id, status_id, granted_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                domain.get() as i64,
                member.get() as i64,
                cfg.assigned_role as i64,
                now
            ],
        )
        .map_err(call_err)?;
        debug!(domain = %domain, member = %member, "status granted");
        Ok(())
    }

    async fn revoke_status(
        &self,
        domain: DomainId,
        member: MemberId,
    ) -> std::result::Result<(), CollaboratorError> {
        self.configured(domain)?;
        let db = self.conn().map_err(call_err)?;
        db.execute(
            "DELETE FROM status_assignments WHERE domain_id = ?1 AND member_id = ?2",
            rusqlite::params![domain.get() as i64, member.get() as i64],
        )
        .map_err(call_err)?;
        debug!(domain = %domain, member = %member, "status revoked");
        Ok(())
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn roster(eligible: u64, assigned: u64) -> RosterMembership {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let mut d = DomainConfig::new(DomainId(1));
        d.eligible_role = eligible;
        d.assigned_role = assigned;
        d.members = vec![MemberId(10), MemberId(20), MemberId(30)];
        RosterMembership::new(conn, &[d], Duration::ZERO)
    }

    #[tokio::test]
    async fn pool_is_the_configured_member_list() {
        let r = roster(5, 6);
        let pool = r.resolve_eligibility_pool(DomainId(1)).await.unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.contains(&MemberId(20)));
    }

    #[tokio::test]
    async fn zero_role_ids_are_unconfigured() {
        for (e, a) in [(0, 6), (5, 0)] {
            let r = roster(e, a);
            assert!(matches!(
                r.resolve_eligibility_pool(DomainId(1)).await,
                Err(CollaboratorError::Unconfigured(_))
            ));
        }
        let r = roster(5, 6);
        assert!(matches!(
            r.resolve_eligibility_pool(DomainId(99)).await,
            Err(CollaboratorError::Unconfigured(_))
        ));
    }

    #[tokio::test]
    async fn grant_and_revoke_track_assignments() {
        let r = roster(5, 6);
        r.grant_status(DomainId(1), MemberId(10)).await.unwrap();
        r.grant_status(DomainId(1), MemberId(30)).await.unwrap();
        // Granting twice is harmless.
        r.grant_status(DomainId(1), MemberId(30)).await.unwrap();
        assert_eq!(
            r.assignments(DomainId(1)).unwrap(),
            [MemberId(10), MemberId(30)].into_iter().collect::<BTreeSet<_>>()
        );

        r.revoke_status(DomainId(1), MemberId(10)).await.unwrap();
        // Revoking someone without the status is not an error.
        r.revoke_status(DomainId(1), MemberId(20)).await.unwrap();
        assert_eq!(
            r.assignments(DomainId(1)).unwrap(),
            [MemberId(30)].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn grant_outside_roster_fails() {
        let r = roster(5, 6);
        assert!(matches!(
            r.grant_status(DomainId(1), MemberId(77)).await,
            Err(CollaboratorError::Call(_))
        ));
    }
}
