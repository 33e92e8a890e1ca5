use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::types::{ScheduleDescription, ScheduleKind};

/// Compute the next instant `schedule` fires strictly after `now`.
///
/// All calendar arithmetic happens in the schedule's timezone; the result is
/// an absolute UTC instant. Returns `None` when the schedule is disabled, the
/// kind is unknown, or the timezone cannot be parsed.
pub fn compute_next_run(schedule: &ScheduleDescription, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.enabled {
        return None;
    }
    let tz = match schedule.tz() {
        Ok(tz) => tz,
        Err(e) => {
            warn!(timezone = %schedule.timezone, "cannot compute next run: {e}");
            return None;
        }
    };

    let today = now.with_timezone(&tz).date_naive();
    let time = schedule.time.as_naive();

    match schedule.kind {
        ScheduleKind::Daily => {
            first_after(now, tz, time, (0..3).filter_map(|k| today.checked_add_days(Days::new(k))))
        }

        ScheduleKind::Weekly => {
            let today_dow = today.weekday().num_days_from_monday() as i64;
            let target_dow = (schedule.weekday as i64).clamp(0, 6);
            // 0..=6 days ahead; the same weekday counts as today.
            let days_ahead = (target_dow - today_dow).rem_euclid(7) as u64;
            first_after(
                now,
                tz,
                time,
                (0..3).filter_map(|week| today.checked_add_days(Days::new(days_ahead + 7 * week))),
            )
        }

        ScheduleKind::Monthly => {
            let day = schedule.day_of_month.clamp(1, 31) as u32;
            let candidates = (0..3).filter_map(|offset| {
                let (year, month) = add_months(today.year(), today.month(), offset);
                clamped_date(year, month, day)
            });
            first_after(now, tz, time, candidates)
        }

        ScheduleKind::EveryNDays => {
            let n = schedule.n_days.max(1) as u64;
            first_after(
                now,
                tz,
                time,
                (0..4).filter_map(|k| today.checked_add_days(Days::new(n * k))),
            )
        }

        ScheduleKind::Unknown => {
            warn!("unknown schedule kind; next_run will not be set");
            None
        }
    }
}

/// Return the first candidate date whose `time` in `tz` lands strictly after `now`.
fn first_after(
    now: DateTime<Utc>,
    tz: Tz,
    time: NaiveTime,
    candidates: impl Iterator<Item = NaiveDate>,
) -> Option<DateTime<Utc>> {
    candidates
        .filter_map(|date| resolve_local(tz, date, time))
        .find(|instant| *instant > now)
}

/// Map a wall-clock date/time in `tz` to an absolute instant.
///
/// Ambiguous times (clocks falling back) resolve to the earlier instant.
/// Times skipped by a forward jump resolve to one hour later.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

fn add_months(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let zero_based = month - 1 + offset;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = add_months(year, month, 1);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

/// `day` in the given month, clamped to the month's last day.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}
