use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rolecycler_core::{DomainId, MemberId};
use rolecycler_scheduler::{compute_next_run, Marker, ScheduleDescription, ScheduleError};
use serde::{Deserialize, Serialize};

use crate::duration::DurationTracker;
use crate::fairness::FairnessQueue;

/// Snapshot layout version, bumped on incompatible changes.
pub const STATE_VERSION: u32 = 1;

/// Everything persisted for one rotation domain. Written as a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub domain: DomainId,
    #[serde(default)]
    pub schedule: ScheduleDescription,
    pub picks: u32,
    #[serde(default)]
    pub queue: FairnessQueue,
    /// Members currently holding the assigned status.
    #[serde(default)]
    pub holders: BTreeSet<MemberId>,
    #[serde(default)]
    pub stats: DurationTracker,
    /// `None` iff the schedule is disabled (or not yet armed).
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
}

impl DomainState {
    pub fn new(domain: DomainId, schedule: ScheduleDescription, picks: u32) -> Self {
        Self {
            version: STATE_VERSION,
            domain,
            schedule,
            picks,
            queue: FairnessQueue::default(),
            holders: BTreeSet::new(),
            stats: DurationTracker::default(),
            next_run: None,
            last_run: None,
            run_count: 0,
        }
    }

    pub fn marker(&self) -> Marker {
        if !self.schedule.enabled {
            return Marker::Disabled;
        }
        match self.next_run {
            Some(at) => Marker::At(at),
            None => Marker::Unset,
        }
    }

    /// Recompute `next_run` from `now`.
    ///
    /// A schedule that cannot be evaluated (unknown kind, bad timezone) is
    /// switched off and the reason returned; the caller reports it.
    pub fn rearm(&mut self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        if !self.schedule.enabled {
            self.next_run = None;
            return Ok(None);
        }
        if let Err(e) = self.schedule.validate() {
            self.schedule.enabled = false;
            self.next_run = None;
            return Err(e);
        }
        self.next_run = compute_next_run(&self.schedule, now);
        Ok(self.next_run)
    }
}

fn default_version() -> u32 {
    STATE_VERSION
}
