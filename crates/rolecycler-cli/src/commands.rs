use chrono::Utc;
use rolecycler_core::DomainId;
use rolecycler_rotation::{format_duration, stats_csv, DomainStatus};
use rolecycler_scheduler::{ScheduleDescription, ScheduleKind, TimeOfDay};

use crate::app::App;

pub async fn run(app: &App, domain: DomainId, no_wait: bool, json: bool) -> anyhow::Result<()> {
    let report = if no_wait {
        app.engine.try_trigger_manual_run(domain).await?
    } else {
        app.engine.trigger_manual_run(domain).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", report.summary());
    println!("  granted: {}", join(&report.granted));
    println!("  revoked: {}", join(&report.revoked));
    for f in &report.failures {
        println!("  failed {:?} for {}: {}", f.action, f.member, f.reason);
    }
    Ok(())
}

pub async fn status(app: &App, domain: DomainId, json: bool) -> anyhow::Result<()> {
    let status = app.engine.get_status(domain).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(s: &DomainStatus) {
    println!("domain {} ({:?})", s.domain, s.phase);
    println!("  schedule:  {}{}", s.schedule_text, if s.schedule.enabled { "" } else { " [stopped]" });
    println!("  timezone:  {}", s.schedule.timezone);
    println!("  picks:     {}", s.picks);
    println!("  next run:  {}", s.next_run.map_or("-".to_string(), |t| t.to_rfc3339()));
    println!("  last run:  {}", s.last_run.map_or("-".to_string(), |t| t.to_rfc3339()));
    println!("  runs:      {}", s.run_count);
    println!("  holders:   {}", join(&s.current_holders));
    if s.upcoming.is_empty() {
        println!("  upcoming:  (new cycle on next run)");
    }
    for (i, group) in s.upcoming.iter().enumerate() {
        println!("  group {}:   {}", i + 1, join(group));
    }
}

pub async fn stats(app: &App, domain: DomainId, csv: bool, json: bool) -> anyhow::Result<()> {
    let stats = app.engine.get_stats(domain, Utc::now()).await?;
    if csv {
        print!("{}", stats_csv(&stats));
    } else if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if stats.is_empty() {
        println!("no rotations yet");
    } else {
        for s in &stats {
            let marker = if s.holding { " *" } else { "" };
            println!(
                "{:>20}  {}{}",
                s.member.to_string(),
                format_duration(s.total_seconds),
                marker
            );
        }
    }
    Ok(())
}

pub fn history(app: &App, domain: DomainId, limit: usize, json: bool) -> anyhow::Result<()> {
    let runs = app.store.recent_runs(domain, limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        println!("no runs recorded");
    } else {
        for r in &runs {
            println!("{}  {:?}  {}", r.started_at.to_rfc3339(), r.trigger, r.summary());
        }
    }
    Ok(())
}

pub async fn schedule_show(app: &App, domain: DomainId, json: bool) -> anyhow::Result<()> {
    let status = app.engine.get_status(domain).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status.schedule)?);
        return Ok(());
    }
    println!(
        "{} ({}){}",
        status.schedule_text,
        status.schedule.timezone,
        if status.schedule.enabled { "" } else { " [stopped]" }
    );
    let local = app.engine.now_in_domain_timezone(domain).await?;
    println!("  local time now: {}", local.format("%Y-%m-%d %H:%M"));
    if let Some(next) = status.next_run {
        let tz = status.schedule.tz()?;
        println!("  next run:       {}", next.with_timezone(&tz).format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

/// Fields given on the command line; `None` keeps the stored value.
pub struct ScheduleEdit {
    pub kind: Option<ScheduleKind>,
    pub time: Option<TimeOfDay>,
    pub weekday: Option<u8>,
    pub day_of_month: Option<u8>,
    pub n_days: Option<u32>,
    pub timezone: Option<String>,
}

impl ScheduleEdit {
    fn apply(self, mut s: ScheduleDescription) -> ScheduleDescription {
        if let Some(k) = self.kind {
            s.kind = k;
        }
        if let Some(t) = self.time {
            s.time = t;
        }
        if let Some(w) = self.weekday {
            s.weekday = w;
        }
        if let Some(d) = self.day_of_month {
            s.day_of_month = d;
        }
        if let Some(n) = self.n_days {
            s.n_days = n;
        }
        if let Some(tz) = self.timezone {
            s.timezone = tz;
        }
        s
    }
}

pub async fn schedule_set(app: &App, domain: DomainId, edit: ScheduleEdit) -> anyhow::Result<()> {
    let current = app.engine.get_status(domain).await?.schedule;
    let state = app
        .engine
        .reconfigure_schedule(domain, edit.apply(current))
        .await?;
    println!("schedule: {}", state.schedule.describe());
    match state.next_run {
        Some(t) => println!("next run: {}", t.to_rfc3339()),
        None => println!("schedule is stopped"),
    }
    Ok(())
}

pub async fn schedule_toggle(app: &App, domain: DomainId, enabled: bool) -> anyhow::Result<()> {
    match app.engine.set_schedule_enabled(domain, enabled).await? {
        Some(next) => println!("schedule resumed, next run {}", next.to_rfc3339()),
        None => println!("schedule stopped"),
    }
    Ok(())
}

pub async fn picks_set(app: &App, domain: DomainId, count: u32) -> anyhow::Result<()> {
    app.engine.set_picks_count(domain, count).await?;
    println!("picks per run: {count}");
    Ok(())
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
