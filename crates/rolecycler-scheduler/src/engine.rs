use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::types::Marker;

/// Something the scheduler loop can drive: it exposes a persisted next-run
/// marker and knows how to (re)arm it and how to fire.
///
/// The loop never looks at schedules directly, so any host (timer, cron,
/// actor mailbox) can drive a target the same way.
#[async_trait]
pub trait Schedulable: Send + Sync {
    type Error: Display + Send + Sync + 'static;

    /// Label used in log fields.
    fn label(&self) -> String;

    /// Current marker state as persisted.
    async fn marker(&self) -> Result<Marker, Self::Error>;

    /// Compute and persist the marker from `now`. `None` means nothing is scheduled.
    async fn arm(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, Self::Error>;

    /// Execute the due work. Implementations recompute the marker themselves.
    async fn fire(&self, now: DateTime<Utc>) -> Result<(), Self::Error>;
}

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// How often a disabled target is re-checked for re-enablement.
    pub disabled_poll: Duration,
    /// Upper bound on a single sleep, so clock jumps and external marker
    /// changes are noticed.
    pub max_sleep: Duration,
    /// Lower bound on a single sleep.
    pub min_sleep: Duration,
    /// Pause after a failed marker read, arm or fire.
    pub error_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            disabled_poll: Duration::from_secs(10),
            max_sleep: Duration::from_secs(30),
            min_sleep: Duration::from_millis(500),
            error_backoff: Duration::from_secs(10),
        }
    }
}

/// Background loop for one target.
pub struct SchedulerEngine<T: Schedulable> {
    target: Arc<T>,
    clock: Arc<dyn Clock>,
    cfg: LoopConfig,
}

impl<T: Schedulable + 'static> SchedulerEngine<T> {
    pub fn new(target: Arc<T>, clock: Arc<dyn Clock>, cfg: LoopConfig) -> Self {
        Self { target, clock, cfg }
    }

    /// Run on a fresh Tokio task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Main loop. Runs until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let label = self.target.label();
        info!(target_name = %label, "scheduler loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = self.step().await;
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(target_name = %label, "scheduler loop shutting down");
    }

    /// One pass: inspect the marker, act on it, and return how long to wait
    /// before the next pass.
    pub async fn step(&self) -> Duration {
        let now = self.clock.now();
        let label = self.target.label();

        match self.target.marker().await {
            Err(e) => {
                error!(target_name = %label, "reading next-run marker failed: {e}");
                self.cfg.error_backoff
            }
            Ok(Marker::Disabled) => {
                debug!(target_name = %label, "schedule disabled");
                self.cfg.disabled_poll
            }
            Ok(Marker::Unset) => match self.target.arm(now).await {
                Ok(Some(next)) => {
                    info!(target_name = %label, next_run = %next, "next run armed");
                    self.until(next, now)
                }
                Ok(None) => {
                    warn!(target_name = %label, "schedule enabled but no next run could be computed");
                    self.cfg.disabled_poll
                }
                Err(e) => {
                    error!(target_name = %label, "arming next run failed: {e}");
                    self.cfg.error_backoff
                }
            },
            // `>=` rather than equality: wake-ups are never exact.
            Ok(Marker::At(due)) if now >= due => {
                info!(target_name = %label, due = %due, "scheduled run due");
                match self.target.fire(now).await {
                    Ok(()) => self.cfg.min_sleep,
                    Err(e) => {
                        error!(target_name = %label, "scheduled run failed: {e}");
                        self.cfg.error_backoff
                    }
                }
            }
            Ok(Marker::At(due)) => self.until(due, now),
        }
    }

    fn until(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        // A marker closer than `min_sleep` fires up to `min_sleep` late; the
        // `>=` check in `step` still catches it on the next pass.
        (due - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .clamp(self.cfg.min_sleep, self.cfg.max_sleep)
    }
}
