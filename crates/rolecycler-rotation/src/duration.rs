//! Per-member held-time accounting.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rolecycler_core::MemberId;
use serde::{Deserialize, Serialize};

/// Held time for one member. `holding_since` is set while the member holds
/// the assigned status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRecord {
    #[serde(default)]
    pub accumulated_seconds: u64,
    #[serde(default)]
    pub holding_since: Option<DateTime<Utc>>,
}

impl HoldRecord {
    pub fn is_holding(&self) -> bool {
        self.holding_since.is_some()
    }

    /// Accumulated time plus the open interval up to `now`.
    pub fn total_at(&self, now: DateTime<Utc>) -> u64 {
        self.accumulated_seconds + self.holding_since.map_or(0, |since| elapsed(since, now))
    }
}

/// Hold records keyed by member. Records are created on demand and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationTracker {
    records: BTreeMap<MemberId, HoldRecord>,
}

impl DurationTracker {
    /// Finalize an open interval. No-op for a member who is not holding.
    pub fn close(&mut self, member: MemberId, now: DateTime<Utc>) {
        let rec = self.records.entry(member).or_default();
        if let Some(since) = rec.holding_since.take() {
            rec.accumulated_seconds += elapsed(since, now);
        }
    }

    /// Start (or restart) an interval at `now`.
    pub fn open(&mut self, member: MemberId, now: DateTime<Utc>) {
        self.records.entry(member).or_default().holding_since = Some(now);
    }

    pub fn total(&self, member: MemberId, now: DateTime<Utc>) -> u64 {
        self.records.get(&member).map_or(0, |r| r.total_at(now))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &HoldRecord)> {
        self.records.iter()
    }
}

// Clock skew can put `now` before `since`; count that as zero.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn open_close_reopen_accumulates() {
        let m = MemberId(1);
        let mut tracker = DurationTracker::default();

        tracker.open(m, t0());
        tracker.close(m, t0() + Duration::seconds(100));
        assert_eq!(tracker.total(m, t0() + Duration::seconds(150)), 100);

        tracker.open(m, t0() + Duration::seconds(200));
        assert_eq!(tracker.total(m, t0() + Duration::seconds(250)), 150);
        // total() is read-only
        assert_eq!(tracker.total(m, t0() + Duration::seconds(200)), 100);
    }

    #[test]
    fn close_without_open_creates_empty_record() {
        let mut tracker = DurationTracker::default();
        tracker.close(MemberId(7), t0());
        let (id, rec) = tracker.iter().next().unwrap();
        assert_eq!(*id, MemberId(7));
        assert_eq!(rec.accumulated_seconds, 0);
        assert!(!rec.is_holding());
    }

    #[test]
    fn double_close_counts_once() {
        let m = MemberId(2);
        let mut tracker = DurationTracker::default();
        tracker.open(m, t0());
        tracker.close(m, t0() + Duration::seconds(60));
        tracker.close(m, t0() + Duration::seconds(600));
        assert_eq!(tracker.total(m, t0() + Duration::seconds(900)), 60);
    }

    #[test]
    fn backwards_clock_adds_nothing() {
        let m = MemberId(3);
        let mut tracker = DurationTracker::default();
        tracker.open(m, t0());
        tracker.close(m, t0() - Duration::seconds(30));
        assert_eq!(tracker.total(m, t0()), 0);
    }

    #[test]
    fn closed_records_are_kept_as_history() {
        let mut tracker = DurationTracker::default();
        tracker.open(MemberId(1), t0());
        tracker.open(MemberId(2), t0());
        tracker.close(MemberId(1), t0() + Duration::seconds(10));
        let open: Vec<_> = tracker
            .iter()
            .filter(|(_, r)| r.is_holding())
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(open, vec![MemberId(2)]);
        assert_eq!(tracker.iter().count(), 2);
    }

    #[test]
    fn open_interval_survives_serialization() {
        let mut tracker = DurationTracker::default();
        tracker.open(MemberId(42), t0());
        let json = serde_json::to_string(&tracker).unwrap();
        assert!(json.contains("\"42\""));
        let back: DurationTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total(MemberId(42), t0() + Duration::seconds(90)), 90);
    }
}
