use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use rolecycler_core::config::CyclerConfig;
use rolecycler_core::DomainId;
use rolecycler_rotation::{EngineOptions, RotationEngine};
use rolecycler_scheduler::SystemClock;
use rolecycler_store::{db, RosterMembership, SqliteStateStore};
use tracing::{info, warn};

/// Everything a command needs: config, the engine and its backing store.
pub struct App {
    pub config: CyclerConfig,
    pub engine: Arc<RotationEngine>,
    pub store: Arc<SqliteStateStore>,
}

impl App {
    pub async fn open(config_path: Option<&str>) -> anyhow::Result<Self> {
        let config = CyclerConfig::load(config_path).unwrap_or_else(|e| {
            warn!(code = e.code(), "Config load failed ({}), using defaults", e);
            CyclerConfig::default()
        });

        let db_path = &config.database.path;
        info!(path = %db_path, "opening SQLite database");

        // each subsystem gets its own connection
        let store = Arc::new(
            SqliteStateStore::new(db::open(db_path).context("opening state database")?)
                .with_history_limit(config.database.history_limit),
        );
        let roster = Arc::new(RosterMembership::new(
            db::open(db_path).context("opening roster database")?,
            &config.domains,
            Duration::from_millis(config.engine.pacing_ms),
        ));

        let engine = Arc::new(
            RotationEngine::new(roster, store.clone(), Arc::new(SystemClock))
                .with_options(EngineOptions::from(&config.engine)),
        );

        for domain in &config.domains {
            engine
                .ensure_domain(domain)
                .await
                .with_context(|| format!("initialising domain {}", domain.display_name()))?;
        }

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    /// Explicit `--domain`, or the only configured domain.
    pub fn resolve_domain(&self, requested: Option<DomainId>) -> anyhow::Result<DomainId> {
        if let Some(id) = requested {
            return Ok(id);
        }
        match self.config.domains.as_slice() {
            [only] => Ok(only.id),
            [] => bail!("no domains configured; add a [[domains]] table to the config"),
            _ => bail!("several domains configured; pass --domain <id>"),
        }
    }
}
