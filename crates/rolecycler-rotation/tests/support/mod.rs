//! Shared fakes for the rotation integration tests.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rolecycler_core::config::DomainConfig;
use rolecycler_core::{DomainId, MemberId};
use rolecycler_rotation::{
    CollaboratorError, DomainState, EngineOptions, Membership, PersistError, RotationEngine,
    RunReport, StateStore, StatusAction,
};
use rolecycler_scheduler::{ManualClock, ScheduleDescription, TimeOfDay};

/// What the fake platform saw, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Pool(DomainId),
    Call(DomainId, StatusAction, MemberId),
}

/// Scriptable stand-in for the platform.
#[derive(Default)]
pub struct ScriptedMembership {
    pool: Mutex<BTreeSet<MemberId>>,
    unconfigured: AtomicBool,
    pool_down: AtomicBool,
    fail_grant: Mutex<HashSet<MemberId>>,
    fail_revoke: Mutex<HashSet<MemberId>>,
    holders: Mutex<BTreeSet<MemberId>>,
    events: Mutex<Vec<Event>>,
    call_delay: Mutex<Duration>,
    pacing: Mutex<Duration>,
}

impl ScriptedMembership {
    pub fn with_pool(ids: impl IntoIterator<Item = u64>) -> Self {
        let m = Self::default();
        m.set_pool(ids);
        m
    }

    pub fn set_pool(&self, ids: impl IntoIterator<Item = u64>) {
        *self.pool.lock().unwrap() = ids.into_iter().map(MemberId).collect();
    }

    pub fn set_unconfigured(&self, v: bool) {
        self.unconfigured.store(v, Ordering::SeqCst);
    }

    pub fn set_pool_down(&self, v: bool) {
        self.pool_down.store(v, Ordering::SeqCst);
    }

    pub fn fail_grant(&self, ids: impl IntoIterator<Item = u64>) {
        *self.fail_grant.lock().unwrap() = ids.into_iter().map(MemberId).collect();
    }

    pub fn fail_revoke(&self, ids: impl IntoIterator<Item = u64>) {
        *self.fail_revoke.lock().unwrap() = ids.into_iter().map(MemberId).collect();
    }

    /// Each grant/revoke sleeps this long, to widen race windows.
    pub fn set_call_delay(&self, d: Duration) {
        *self.call_delay.lock().unwrap() = d;
    }

    pub fn set_pacing(&self, d: Duration) {
        *self.pacing.lock().unwrap() = d;
    }

    /// Members the platform currently shows with the assigned status.
    pub fn holders(&self) -> BTreeSet<MemberId> {
        self.holders.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    async fn delay(&self) {
        let d = *self.call_delay.lock().unwrap();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl Membership for ScriptedMembership {
    async fn resolve_eligibility_pool(
        &self,
        domain: DomainId,
    ) -> Result<BTreeSet<MemberId>, CollaboratorError> {
        if self.unconfigured.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unconfigured("eligible role not set".into()));
        }
        if self.pool_down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Call("platform unreachable".into()));
        }
        self.events.lock().unwrap().push(Event::Pool(domain));
        Ok(self.pool.lock().unwrap().clone())
    }

    async fn grant_status(&self, domain: DomainId, member: MemberId) -> Result<(), CollaboratorError> {
        self.delay().await;
        self.events
            .lock()
            .unwrap()
            .push(Event::Call(domain, StatusAction::Grant, member));
        if self.fail_grant.lock().unwrap().contains(&member) {
            return Err(CollaboratorError::Call(format!("cannot grant {member}")));
        }
        self.holders.lock().unwrap().insert(member);
        Ok(())
    }

    async fn revoke_status(&self, domain: DomainId, member: MemberId) -> Result<(), CollaboratorError> {
        self.delay().await;
        self.events
            .lock()
            .unwrap()
            .push(Event::Call(domain, StatusAction::Revoke, member));
        if self.fail_revoke.lock().unwrap().contains(&member) {
            return Err(CollaboratorError::Call(format!("cannot revoke {member}")));
        }
        self.holders.lock().unwrap().remove(&member);
        Ok(())
    }

    fn pacing(&self) -> Duration {
        *self.pacing.lock().unwrap()
    }
}

/// Store that keeps snapshots as JSON, like the SQLite store does.
#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<DomainId, String>>,
    runs: Mutex<Vec<RunReport>>,
    leases: Mutex<HashMap<DomainId, (String, Instant)>>,
    failures_left: AtomicU32,
    persist_calls: AtomicU32,
}

impl MemoryStore {
    /// Make the next `n` persist calls fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, domain: DomainId) -> Option<DomainState> {
        self.states
            .lock()
            .unwrap()
            .get(&domain)
            .map(|json| serde_json::from_str(json).unwrap())
    }

    /// Overwrite a snapshot behind the engine's back.
    pub fn put(&self, state: &DomainState) {
        self.states
            .lock()
            .unwrap()
            .insert(state.domain, serde_json::to_string(state).unwrap());
    }

    pub fn runs(&self) -> Vec<RunReport> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, domain: DomainId) -> Result<Option<DomainState>, PersistError> {
        Ok(self.snapshot(domain))
    }

    async fn persist(&self, state: &DomainState) -> Result<(), PersistError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(PersistError("disk full".into()));
        }
        self.put(state);
        Ok(())
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), PersistError> {
        self.runs.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn acquire_lease(
        &self,
        domain: DomainId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, PersistError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();
        if let Some((holder, expires)) = leases.get(&domain) {
            if holder != owner && *expires > now {
                return Ok(false);
            }
        }
        leases.insert(domain, (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn release_lease(&self, domain: DomainId, owner: &str) -> Result<(), PersistError> {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(&domain).is_some_and(|(holder, _)| holder == owner) {
            leases.remove(&domain);
        }
        Ok(())
    }

    async fn lease_held(&self, domain: DomainId) -> Result<bool, PersistError> {
        let now = Instant::now();
        Ok(self
            .leases
            .lock()
            .unwrap()
            .get(&domain)
            .is_some_and(|(_, expires)| *expires > now))
    }
}

pub struct Harness {
    pub membership: Arc<ScriptedMembership>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<RotationEngine>,
}

/// Friday 2026-10-16 10:00 UTC.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()
}

pub fn daily_nine_utc() -> ScheduleDescription {
    ScheduleDescription::daily(TimeOfDay::new(9, 0).unwrap()).with_timezone("UTC")
}

pub fn ids(v: &[u64]) -> BTreeSet<MemberId> {
    v.iter().copied().map(MemberId).collect()
}

impl Harness {
    pub fn new(pool: impl IntoIterator<Item = u64>) -> Self {
        let membership = Arc::new(ScriptedMembership::with_pool(pool));
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let engine = Arc::new(build_engine(&membership, &store, &clock, 7));
        Self {
            membership,
            store,
            clock,
            engine,
        }
    }

    /// A second engine over the same store, as after a process restart.
    pub fn restart(&self, seed: u64) -> RotationEngine {
        build_engine(&self.membership, &self.store, &self.clock, seed)
    }

    pub async fn domain(&self, id: u64, picks: u32) -> DomainId {
        let mut cfg = DomainConfig::new(DomainId(id));
        cfg.picks = picks;
        cfg.schedule = daily_nine_utc();
        self.engine.ensure_domain(&cfg).await.unwrap();
        cfg.id
    }
}

fn build_engine(
    membership: &Arc<ScriptedMembership>,
    store: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
    seed: u64,
) -> RotationEngine {
    RotationEngine::with_seed(membership.clone(), store.clone(), clock.clone(), seed).with_options(
        EngineOptions {
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(1),
            lease_poll: Duration::from_millis(5),
            ..EngineOptions::default()
        },
    )
}
