use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rolecycler_core::config::{DomainConfig, EngineConfig, MAX_PICKS};
use rolecycler_core::DomainId;
use rolecycler_scheduler::{Clock, Marker, ScheduleDescription};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::collaborator::{CollaboratorError, Membership, PersistError, StateStore};
use crate::error::{Result, RotationError};
use crate::report::{
    DomainStatus, MemberFailure, MemberStat, RunPhase, RunReport, RunTrigger, StatusAction,
    UnderSupply,
};
use crate::state::DomainState;

/// Tunables for [`RotationEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Attempts at the end-of-run write before giving up.
    pub persist_attempts: u32,
    /// Pause between persist attempts.
    pub persist_backoff: Duration,
    /// Lifetime of the store-level run lease.
    pub lease_ttl: Duration,
    /// How often a waiting operation re-checks a lease held elsewhere.
    pub lease_poll: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(200),
            lease_ttl: Duration::from_secs(600),
            lease_poll: Duration::from_millis(250),
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            persist_attempts: cfg.persist_attempts.max(1),
            lease_ttl: Duration::from_secs(cfg.lease_ttl_secs.max(1)),
            ..Self::default()
        }
    }
}

/// Runs rotations for any number of independent domains.
///
/// Every state change for a domain happens under that domain's lock and the
/// store's run lease, and is written to the [`StateStore`] in one piece at
/// the end of the operation. The lock orders callers inside this process;
/// the lease orders engines in other processes sharing the same store.
/// Runs on different domains proceed in parallel.
pub struct RotationEngine {
    membership: Arc<dyn Membership>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    rng: Mutex<ChaCha8Rng>,
    locks: DashMap<DomainId, Arc<tokio::sync::Mutex<()>>>,
    lease_owner: String,
    opts: EngineOptions,
}

impl RotationEngine {
    pub fn new(
        membership: Arc<dyn Membership>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_rng(membership, store, clock, ChaCha8Rng::from_entropy())
    }

    /// Deterministic shuffles, for simulations and tests.
    pub fn with_seed(
        membership: Arc<dyn Membership>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self::with_rng(membership, store, clock, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(
        membership: Arc<dyn Membership>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            membership,
            store,
            clock,
            rng: Mutex::new(rng),
            locks: DashMap::new(),
            lease_owner: Uuid::new_v4().to_string(),
            opts: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: EngineOptions) -> Self {
        self.opts = opts;
        self
    }

    // ── Domain lifecycle ─────────────────────────────────────────────────────

    /// Load the domain, or create it from `cfg` and arm its first run.
    #[instrument(skip(self, cfg), fields(domain = %cfg.id))]
    pub async fn ensure_domain(&self, cfg: &DomainConfig) -> Result<DomainState> {
        self.exclusive(cfg.id, true, move || async move {
            if let Some(state) = self.load(cfg.id).await? {
                debug!("domain already initialised");
                return Ok(state);
            }

            check_picks(cfg.picks)?;
            let mut state = DomainState::new(cfg.id, cfg.schedule.clone(), cfg.picks);
            if let Err(e) = state.rearm(self.clock.now()) {
                warn!(domain = %cfg.id, "configured schedule unusable, starting disabled: {e}");
            }
            self.commit(&state).await?;
            info!(domain = %cfg.id, name = %cfg.display_name(), "rotation domain created");
            Ok(state)
        })
        .await
    }

    /// Replace the schedule and recompute the next run.
    #[instrument(skip(self, schedule), fields(domain = %domain, kind = %schedule.kind))]
    pub async fn reconfigure_schedule(
        &self,
        domain: DomainId,
        schedule: ScheduleDescription,
    ) -> Result<DomainState> {
        schedule.validate()?;

        self.exclusive(domain, true, move || async move {
            let mut state = self.require(domain).await?;
            state.schedule = schedule;
            state.rearm(self.clock.now())?;
            self.commit(&state).await?;

            info!(
                domain = %domain,
                schedule = %state.schedule.describe(),
                next_run = ?state.next_run,
                "schedule reconfigured"
            );
            Ok(state)
        })
        .await
    }

    /// Stop or resume the schedule. Returns the new next-run instant.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn set_schedule_enabled(
        &self,
        domain: DomainId,
        enabled: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        self.exclusive(domain, true, move || async move {
            let mut state = self.require(domain).await?;
            state.schedule.enabled = enabled;
            let rearmed = state.rearm(self.clock.now());
            // Commit either way: a failed rearm leaves the schedule switched off.
            self.commit(&state).await?;

            match rearmed {
                Ok(next) => {
                    info!(domain = %domain, enabled, next_run = ?next, "schedule toggled");
                    Ok(next)
                }
                Err(e) => {
                    error!(domain = %domain, "schedule cannot be resumed: {e}");
                    Err(e.into())
                }
            }
        })
        .await
    }

    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn set_picks_count(&self, domain: DomainId, picks: u32) -> Result<()> {
        check_picks(picks)?;

        self.exclusive(domain, true, move || async move {
            let mut state = self.require(domain).await?;
            state.picks = picks;
            self.commit(&state).await?;
            info!(domain = %domain, picks, "pick count updated");
            Ok(())
        })
        .await
    }

    // ── Runs ─────────────────────────────────────────────────────────────────

    /// Run now, waiting for any run already in progress on the domain.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn trigger_manual_run(&self, domain: DomainId) -> Result<RunReport> {
        self.exclusive(domain, true, move || async move {
            let state = self.require(domain).await?;
            self.run_locked(state, RunTrigger::Manual).await
        })
        .await
    }

    /// Run now, or fail with [`RotationError::RunInProgress`] if the domain is
    /// busy here or leased by another process.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn try_trigger_manual_run(&self, domain: DomainId) -> Result<RunReport> {
        self.exclusive(domain, false, move || async move {
            let state = self.require(domain).await?;
            self.run_locked(state, RunTrigger::Manual).await
        })
        .await
    }

    /// Scheduled entry point. Runs only if the stored marker is due at `now`,
    /// re-checked under the lock so a concurrent manual run or reconfiguration
    /// is honoured.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn run_if_due(
        &self,
        domain: DomainId,
        now: DateTime<Utc>,
    ) -> Result<Option<RunReport>> {
        self.exclusive(domain, true, move || async move {
            let state = self.require(domain).await?;
            match state.marker() {
                Marker::At(due) if now >= due => {
                    self.run_locked(state, RunTrigger::Scheduled).await.map(Some)
                }
                _ => {
                    debug!(domain = %domain, "marker moved while waiting for the lock; skipping");
                    Ok(None)
                }
            }
        })
        .await
    }

    /// Compute and store the marker if it is unset. Returns the stored marker
    /// instant, or `None` when the schedule is off.
    pub async fn arm(&self, domain: DomainId, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.exclusive(domain, true, move || async move {
            let mut state = self.require(domain).await?;
            if state.marker() != Marker::Unset {
                return Ok(state.next_run);
            }
            let rearmed = state.rearm(now);
            self.commit(&state).await?;
            Ok(rearmed?)
        })
        .await
    }

    pub async fn marker(&self, domain: DomainId) -> Result<Marker> {
        Ok(self.require(domain).await?.marker())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn get_status(&self, domain: DomainId) -> Result<DomainStatus> {
        let state = self.require(domain).await?;
        let mut phase = self.phase(domain);
        if phase == RunPhase::Idle && self.store.lease_held(domain).await.map_err(persistence)? {
            phase = RunPhase::RunInProgress;
        }
        Ok(DomainStatus {
            domain,
            phase,
            current_holders: state.holders.iter().copied().collect(),
            upcoming: state.queue.upcoming_groups(state.picks as usize),
            picks: state.picks,
            schedule_text: state.schedule.describe(),
            schedule: state.schedule,
            next_run: state.next_run,
            last_run: state.last_run,
            run_count: state.run_count,
        })
    }

    /// Held time per member as of `as_of`, longest first.
    pub async fn get_stats(&self, domain: DomainId, as_of: DateTime<Utc>) -> Result<Vec<MemberStat>> {
        let state = self.require(domain).await?;
        let mut stats: Vec<MemberStat> = state
            .stats
            .iter()
            .map(|(member, rec)| MemberStat {
                member: *member,
                total_seconds: state.stats.total(*member, as_of),
                holding: rec.is_holding(),
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then(a.member.cmp(&b.member))
        });
        Ok(stats)
    }

    /// Current time in the domain's schedule timezone.
    pub async fn now_in_domain_timezone(&self, domain: DomainId) -> Result<DateTime<Tz>> {
        let state = self.require(domain).await?;
        Ok(state.schedule.local_now(self.clock.now())?)
    }

    /// Phase as seen by this process. [`get_status`](Self::get_status) also
    /// reports leases held by other processes.
    pub fn phase(&self, domain: DomainId) -> RunPhase {
        let Some(lock) = self.locks.get(&domain).map(|l| l.clone()) else {
            return RunPhase::Idle;
        };
        let busy = lock.try_lock().is_err();
        if busy {
            RunPhase::RunInProgress
        } else {
            RunPhase::Idle
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn lock_for(&self, domain: DomainId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(domain).or_default().clone()
    }

    /// Run `op` holding the domain lock and the store lease. With `wait`
    /// unset, a busy domain fails fast with `RunInProgress`.
    async fn exclusive<T, F, Fut>(&self, domain: DomainId, wait: bool, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(domain);
        let _guard = if wait {
            lock.lock().await
        } else {
            lock.try_lock()
                .map_err(|_| RotationError::RunInProgress { domain })?
        };

        self.acquire_lease(domain, wait).await?;
        let out = op().await;
        if let Err(e) = self.store.release_lease(domain, &self.lease_owner).await {
            warn!(domain = %domain, "run lease not released, it will expire: {e}");
        }
        out
    }

    async fn acquire_lease(&self, domain: DomainId, wait: bool) -> Result<()> {
        loop {
            let taken = self
                .store
                .acquire_lease(domain, &self.lease_owner, self.opts.lease_ttl)
                .await
                .map_err(persistence)?;
            if taken {
                return Ok(());
            }
            if !wait {
                return Err(RotationError::RunInProgress { domain });
            }
            debug!(domain = %domain, "domain leased by another process, waiting");
            tokio::time::sleep(self.opts.lease_poll).await;
        }
    }

    async fn load(&self, domain: DomainId) -> Result<Option<DomainState>> {
        self.store.load(domain).await.map_err(persistence)
    }

    async fn require(&self, domain: DomainId) -> Result<DomainState> {
        self.load(domain)
            .await?
            .ok_or(RotationError::DomainNotFound { domain })
    }

    async fn commit(&self, state: &DomainState) -> Result<()> {
        let attempts = self.opts.persist_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            match self.store.persist(state).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(domain = %state.domain, attempt, attempts, "persisting domain state failed: {e}");
                    last_err = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.opts.persist_backoff).await;
                    }
                }
            }
        }

        error!(domain = %state.domain, "domain state NOT committed: {last_err}");
        Err(RotationError::Persistence(last_err))
    }

    /// Body of a run. The caller holds the domain lock and lease.
    async fn run_locked(&self, mut state: DomainState, trigger: RunTrigger) -> Result<RunReport> {
        let domain = state.domain;
        let run_id = Uuid::now_v7();
        let started_at = self.clock.now();
        info!(domain = %domain, run_id = %run_id, ?trigger, "rotation run started");

        // Nothing is touched until the pool resolves.
        let pool = match self.membership.resolve_eligibility_pool(domain).await {
            Ok(pool) => pool,
            Err(CollaboratorError::Unconfigured(msg)) => {
                error!(domain = %domain, run_id = %run_id, "run aborted: {msg}");
                return Err(RotationError::Configuration(msg));
            }
            Err(CollaboratorError::Call(msg)) => {
                error!(domain = %domain, run_id = %run_id, "run aborted, pool unavailable: {msg}");
                return Err(RotationError::PoolUnavailable(msg));
            }
        };

        let pacing = self.membership.pacing();
        let mut calls = 0usize;
        let mut failures = Vec::new();

        let mut revoked = Vec::new();
        for member in std::mem::take(&mut state.holders) {
            state.stats.close(member, self.clock.now());
            pace(pacing, &mut calls).await;
            match self.membership.revoke_status(domain, member).await {
                Ok(()) => revoked.push(member),
                Err(e) => {
                    warn!(domain = %domain, member = %member, "revoke failed: {e}");
                    failures.push(MemberFailure {
                        member,
                        action: StatusAction::Revoke,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let want = state.picks as usize;
        let batch = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            state.queue.next_batch(&pool, want, &mut *rng)
        };

        let under_supply = batch.is_under_filled().then(|| UnderSupply {
            requested: want,
            available: pool.len(),
            picked: batch.picked.len(),
        });
        if let Some(u) = &under_supply {
            warn!(
                domain = %domain,
                requested = u.requested,
                available = u.available,
                "not enough eligible members for a full batch"
            );
        }

        let mut granted = Vec::new();
        for member in &batch.picked {
            pace(pacing, &mut calls).await;
            match self.membership.grant_status(domain, *member).await {
                Ok(()) => {
                    state.stats.open(*member, self.clock.now());
                    state.holders.insert(*member);
                    granted.push(*member);
                }
                Err(e) => {
                    warn!(domain = %domain, member = %member, "grant failed: {e}");
                    failures.push(MemberFailure {
                        member: *member,
                        action: StatusAction::Grant,
                        reason: e.to_string(),
                    });
                }
            }
        }

        state.queue = batch.queue;
        let finished_at = self.clock.now();
        state.last_run = Some(finished_at);
        state.run_count += 1;

        let schedule_issue = match state.rearm(finished_at) {
            Ok(_) => None,
            Err(e) => {
                error!(domain = %domain, "schedule disabled, it cannot be evaluated: {e}");
                Some(e.to_string())
            }
        };

        self.commit(&state).await?;

        let report = RunReport {
            run_id,
            domain,
            trigger,
            started_at,
            finished_at,
            picked: batch.picked,
            granted,
            revoked,
            failures,
            under_supply,
            started_new_cycle: batch.started_new_cycle,
            next_run: state.next_run,
            schedule_issue,
        };

        if let Err(e) = self.store.record_run(&report).await {
            warn!(domain = %domain, run_id = %run_id, "run history not recorded: {e}");
        }

        info!(domain = %domain, run_id = %run_id, "{}", report.summary());
        Ok(report)
    }
}

fn persistence(e: PersistError) -> RotationError {
    RotationError::Persistence(e.to_string())
}

fn check_picks(picks: u32) -> Result<()> {
    if (1..=MAX_PICKS).contains(&picks) {
        Ok(())
    } else {
        Err(RotationError::InvalidArgument(format!(
            "pick count must be 1..={MAX_PICKS}, got {picks}"
        )))
    }
}

/// Sleep `pacing` before every platform call except the first.
async fn pace(pacing: Duration, calls: &mut usize) {
    if *calls > 0 && !pacing.is_zero() {
        tokio::time::sleep(pacing).await;
    }
    *calls += 1;
}
