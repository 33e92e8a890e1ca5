use chrono::{DateTime, Utc};
use rolecycler_core::{DomainId, MemberId};
use rolecycler_scheduler::ScheduleDescription;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusAction {
    Grant,
    Revoke,
}

/// One grant or revoke that the platform refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub member: MemberId,
    pub action: StatusAction,
    pub reason: String,
}

/// Fewer unique members were available than the pick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderSupply {
    pub requested: usize,
    pub available: usize,
    pub picked: usize,
}

/// Outcome of one committed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub domain: DomainId,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Chosen by the fairness queue, before grant failures.
    pub picked: Vec<MemberId>,
    pub granted: Vec<MemberId>,
    pub revoked: Vec<MemberId>,
    #[serde(default)]
    pub failures: Vec<MemberFailure>,
    #[serde(default)]
    pub under_supply: Option<UnderSupply>,
    #[serde(default)]
    pub started_new_cycle: bool,
    pub next_run: Option<DateTime<Utc>>,
    /// Set when the schedule could not be evaluated and was switched off.
    #[serde(default)]
    pub schedule_issue: Option<String>,
}

impl RunReport {
    /// One line for logs and the CLI.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "run {} on domain {}: granted {}, revoked {}",
            self.run_id,
            self.domain,
            self.granted.len(),
            self.revoked.len()
        );
        if !self.failures.is_empty() {
            out.push_str(&format!(", {} failed call(s)", self.failures.len()));
        }
        if let Some(u) = &self.under_supply {
            out.push_str(&format!(
                ", under-supplied ({} of {} requested, {} eligible)",
                u.picked, u.requested, u.available
            ));
        }
        match self.next_run {
            Some(at) => out.push_str(&format!(", next run {}", at.to_rfc3339())),
            None => out.push_str(", no next run"),
        }
        if let Some(issue) = &self.schedule_issue {
            out.push_str(&format!(" (schedule disabled: {issue})"));
        }
        out
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.under_supply.is_none() && self.schedule_issue.is_none()
    }
}

/// Per-domain run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    RunInProgress,
}

/// Read-only view of a domain for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: DomainId,
    pub phase: RunPhase,
    pub current_holders: Vec<MemberId>,
    /// Remaining members of the current cycle, grouped by pick count.
    pub upcoming: Vec<Vec<MemberId>>,
    pub picks: u32,
    pub schedule: ScheduleDescription,
    pub schedule_text: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Held time for one member as of some instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStat {
    pub member: MemberId,
    pub total_seconds: u64,
    pub holding: bool,
}
