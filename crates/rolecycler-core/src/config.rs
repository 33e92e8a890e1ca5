use std::collections::HashSet;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rolecycler_scheduler::ScheduleDescription;
use serde::{Deserialize, Serialize};

use crate::error::{CyclerError, Result};
use crate::types::{DomainId, MemberId};

pub const DEFAULT_PICKS: u32 = 3;
pub const MAX_PICKS: u32 = 100;
pub const DEFAULT_DISABLED_POLL_SECS: u64 = 10; // re-check a stopped schedule
pub const DEFAULT_MAX_SLEEP_SECS: u64 = 30; // never sleep longer than this between marker checks
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 10;
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;
pub const DEFAULT_PACING_MS: u64 = 250; // between consecutive grant/revoke calls
pub const DEFAULT_LEASE_TTL_SECS: u64 = 600; // must outlast the slowest run
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Top-level config (rolecycler.toml + ROLECYCLER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CyclerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// One entry per rotation domain.
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Run reports kept per domain; older ones are pruned. 0 keeps everything.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Timing of the per-domain background loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_disabled_poll_secs")]
    pub disabled_poll_secs: u64,
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            disabled_poll_secs: DEFAULT_DISABLED_POLL_SECS,
            max_sleep_secs: DEFAULT_MAX_SLEEP_SECS,
            error_backoff_secs: DEFAULT_ERROR_BACKOFF_SECS,
        }
    }
}

/// Rotation engine behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times the end-of-run state write is attempted before the run
    /// is reported as a persistence failure.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    /// Delay between consecutive grant/revoke calls against the platform.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Lifetime of the per-domain run lease shared through the database.
    /// A lease left behind by a crashed process blocks the domain this long.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            pacing_ms: DEFAULT_PACING_MS,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

/// A single rotation domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub id: DomainId,
    #[serde(default)]
    pub name: String,
    /// Members granted the assigned status per run.
    #[serde(default = "default_picks")]
    pub picks: u32,
    /// Platform identifier of the group whose members are eligible. 0 = unset.
    #[serde(default)]
    pub eligible_role: u64,
    /// Platform identifier of the status handed out. 0 = unset.
    #[serde(default)]
    pub assigned_role: u64,
    /// Roster for the built-in roster membership backend.
    #[serde(default)]
    pub members: Vec<MemberId>,
    /// Initial schedule; later changes are stored with the domain state.
    #[serde(default)]
    pub schedule: ScheduleDescription,
}

impl DomainConfig {
    pub fn new(id: DomainId) -> Self {
        Self {
            id,
            name: String::new(),
            picks: DEFAULT_PICKS,
            eligible_role: 0,
            assigned_role: 0,
            members: Vec::new(),
            schedule: ScheduleDescription::default(),
        }
    }

    /// Name for logs; falls back to the numeric id.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        }
    }
}

impl CyclerConfig {
    /// Load config from a TOML file with ROLECYCLER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.rolecycler/rolecycler.toml
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `ROLECYCLER_DATABASE__PATH=/tmp/rc.db`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // An explicitly named file must exist; the default one is optional.
        if let Some(explicit) = config_path {
            std::fs::metadata(explicit)?;
        }
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CyclerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROLECYCLER_").split("__"))
            .extract()
            .map_err(|e| CyclerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks figment cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for d in &self.domains {
            if !seen.insert(d.id) {
                return Err(CyclerError::Config(format!("duplicate domain id {}", d.id)));
            }
            if !(1..=MAX_PICKS).contains(&d.picks) {
                return Err(CyclerError::Config(format!(
                    "domain {}: picks must be 1..={MAX_PICKS}, got {}",
                    d.id, d.picks
                )));
            }
            d.schedule
                .validate()
                .map_err(|e| CyclerError::Config(format!("domain {}: {e}", d.id)))?;
        }
        if self.engine.persist_attempts == 0 {
            return Err(CyclerError::Config(
                "engine.persist_attempts must be at least 1".to_string(),
            ));
        }
        if self.engine.lease_ttl_secs == 0 {
            return Err(CyclerError::Config(
                "engine.lease_ttl_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn domain(&self, id: DomainId) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.id == id)
    }
}

fn default_picks() -> u32 {
    DEFAULT_PICKS
}
fn default_disabled_poll_secs() -> u64 {
    DEFAULT_DISABLED_POLL_SECS
}
fn default_max_sleep_secs() -> u64 {
    DEFAULT_MAX_SLEEP_SECS
}
fn default_error_backoff_secs() -> u64 {
    DEFAULT_ERROR_BACKOFF_SECS
}
fn default_persist_attempts() -> u32 {
    DEFAULT_PERSIST_ATTEMPTS
}
fn default_pacing_ms() -> u64 {
    DEFAULT_PACING_MS
}
fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rolecycler/rolecycler.db", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rolecycler/rolecycler.toml", home)
}
