use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolecycler_core::DomainId;
use rolecycler_scheduler::{Marker, Schedulable};
use tokio::sync::mpsc;
use tracing::warn;

use crate::coordinator::RotationEngine;
use crate::error::RotationError;
use crate::report::RunReport;

/// Adapts one domain of a [`RotationEngine`] to the scheduler loop.
pub struct DomainTrigger {
    engine: Arc<RotationEngine>,
    domain: DomainId,
    label: String,
    reports: Option<mpsc::Sender<RunReport>>,
}

impl DomainTrigger {
    pub fn new(engine: Arc<RotationEngine>, domain: DomainId, label: impl Into<String>) -> Self {
        Self {
            engine,
            domain,
            label: label.into(),
            reports: None,
        }
    }

    /// Forward reports of scheduled runs to `tx`. Dropped when the channel is full.
    pub fn with_reports(mut self, tx: mpsc::Sender<RunReport>) -> Self {
        self.reports = Some(tx);
        self
    }
}

#[async_trait]
impl Schedulable for DomainTrigger {
    type Error = RotationError;

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn marker(&self) -> Result<Marker, RotationError> {
        self.engine.marker(self.domain).await
    }

    async fn arm(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RotationError> {
        self.engine.arm(self.domain, now).await
    }

    async fn fire(&self, now: DateTime<Utc>) -> Result<(), RotationError> {
        let Some(report) = self.engine.run_if_due(self.domain, now).await? else {
            return Ok(());
        };
        if let Some(tx) = &self.reports {
            if tx.try_send(report).is_err() {
                warn!(domain = %self.domain, "report channel full or closed, dropping run report");
            }
        }
        Ok(())
    }
}
