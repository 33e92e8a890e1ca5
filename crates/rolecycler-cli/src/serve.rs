use std::sync::Arc;
use std::time::Duration;

use rolecycler_rotation::{DomainTrigger, RunReport};
use rolecycler_scheduler::{LoopConfig, SchedulerEngine, SystemClock};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::app::App;

/// One scheduler loop per configured domain, until Ctrl-C.
pub async fn run(app: App) -> anyhow::Result<()> {
    if app.config.domains.is_empty() {
        warn!("no domains configured, nothing to schedule");
        return Ok(());
    }

    let sched = &app.config.scheduler;
    let loop_cfg = LoopConfig {
        disabled_poll: Duration::from_secs(sched.disabled_poll_secs),
        max_sleep: Duration::from_secs(sched.max_sleep_secs),
        error_backoff: Duration::from_secs(sched.error_backoff_secs),
        ..LoopConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Run-report channel: scheduler loops → report logger task
    let (report_tx, mut report_rx) = mpsc::channel::<RunReport>(64);

    let mut handles = Vec::new();
    for domain in &app.config.domains {
        let trigger = DomainTrigger::new(app.engine.clone(), domain.id, domain.display_name())
            .with_reports(report_tx.clone());
        let looper = SchedulerEngine::new(Arc::new(trigger), Arc::new(SystemClock), loop_cfg.clone());
        handles.push(looper.spawn(shutdown_rx.clone()));
        info!(domain = %domain.id, name = %domain.display_name(), "scheduler loop spawned");
    }
    drop(report_tx);

    let logger = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            if report.is_clean() {
                info!(domain = %report.domain, run_id = %report.run_id, "{}", report.summary());
            } else {
                warn!(domain = %report.domain, run_id = %report.run_id, "{}", report.summary());
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping scheduler loops");
    let _ = shutdown_tx.send(true);

    for h in handles {
        if let Err(e) = h.await {
            warn!("scheduler loop ended abnormally: {e}");
        }
    }
    // Loops own the last report senders; the logger drains and exits.
    let _ = logger.await;
    info!("stopped");
    Ok(())
}
