use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

pub const DEFAULT_TIMEZONE: &str = "Europe/Zagreb";
/// Friday, counted from Monday = 0.
pub const DEFAULT_WEEKDAY: u8 = 4;
pub const MAX_N_DAYS: u32 = 365;

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Which recurrence rule a schedule follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every day at the configured time.
    Daily,
    /// Once a week on `weekday` (0 = Monday … 6 = Sunday).
    Weekly,
    /// Once a month on `day_of_month`, clamped to the month's last day.
    Monthly,
    /// Every `n_days` days, counted from today.
    EveryNDays,
    /// A kind written by a newer build, or garbage. Never fires.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
            ScheduleKind::EveryNDays => "every_n_days",
            ScheduleKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ScheduleKind {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "monthly" => Ok(ScheduleKind::Monthly),
            "every_n_days" | "every-n-days" | "every-days" => Ok(ScheduleKind::EveryNDays),
            _ => Err(ScheduleError::UnsupportedKind),
        }
    }
}

/// Wall-clock time of day, serialised as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub(crate) fn as_naive(&self) -> NaiveTime {
        // Range is enforced by the constructor.
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))?;
        let hour = h.parse::<u8>().map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
        let minute = m.parse::<u8>().map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ScheduleError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Declarative description of when a rotation fires.
///
/// Only the field relevant to `kind` is read; the others are kept so that
/// switching kinds back and forth does not lose earlier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDescription {
    #[serde(default = "default_kind")]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub time: TimeOfDay,
    /// 0 = Monday … 6 = Sunday. Used by `Weekly`.
    #[serde(default = "default_weekday")]
    pub weekday: u8,
    /// 1..=31. Used by `Monthly`.
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u8,
    /// Used by `EveryNDays`.
    #[serde(default = "default_n_days")]
    pub n_days: u32,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// IANA timezone identifier, e.g. `"Europe/Zagreb"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleDescription {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            time: TimeOfDay::default(),
            weekday: DEFAULT_WEEKDAY,
            day_of_month: default_day_of_month(),
            n_days: default_n_days(),
            enabled: true,
            timezone: default_timezone(),
        }
    }
}

impl ScheduleDescription {
    pub fn daily(time: TimeOfDay) -> Self {
        Self {
            kind: ScheduleKind::Daily,
            time,
            ..Self::default()
        }
    }

    pub fn weekly(weekday: u8, time: TimeOfDay) -> Self {
        Self {
            kind: ScheduleKind::Weekly,
            weekday,
            time,
            ..Self::default()
        }
    }

    pub fn monthly(day_of_month: u8, time: TimeOfDay) -> Self {
        Self {
            kind: ScheduleKind::Monthly,
            day_of_month,
            time,
            ..Self::default()
        }
    }

    pub fn every_n_days(n_days: u32, time: TimeOfDay) -> Self {
        Self {
            kind: ScheduleKind::EveryNDays,
            n_days,
            time,
            ..Self::default()
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::UnknownTimezone(self.timezone.clone()))
    }

    /// `now` expressed as wall-clock time in the schedule's timezone.
    pub fn local_now(&self, now: DateTime<Utc>) -> Result<DateTime<Tz>> {
        Ok(now.with_timezone(&self.tz()?))
    }

    /// Reject values the calculator cannot interpret.
    ///
    /// Called at the reconfiguration boundary so that stored schedules are
    /// always usable.
    pub fn validate(&self) -> Result<()> {
        if self.kind == ScheduleKind::Unknown {
            return Err(ScheduleError::UnsupportedKind);
        }
        if self.weekday > 6 {
            return Err(ScheduleError::InvalidSchedule(format!(
                "weekday must be 0..=6, got {}",
                self.weekday
            )));
        }
        if !(1..=31).contains(&self.day_of_month) {
            return Err(ScheduleError::InvalidSchedule(format!(
                "day_of_month must be 1..=31, got {}",
                self.day_of_month
            )));
        }
        if !(1..=MAX_N_DAYS).contains(&self.n_days) {
            return Err(ScheduleError::InvalidSchedule(format!(
                "n_days must be 1..={MAX_N_DAYS}, got {}",
                self.n_days
            )));
        }
        self.tz()?;
        Ok(())
    }

    /// Short human description, e.g. `weekly on Fri at 00:00`.
    pub fn describe(&self) -> String {
        match self.kind {
            ScheduleKind::Daily => format!("daily at {}", self.time),
            ScheduleKind::Weekly => {
                let day = WEEKDAY_NAMES
                    .get(self.weekday as usize)
                    .copied()
                    .unwrap_or("?");
                format!("weekly on {day} at {}", self.time)
            }
            ScheduleKind::Monthly => {
                format!("monthly on day {} at {}", self.day_of_month, self.time)
            }
            ScheduleKind::EveryNDays => {
                format!("every {} day(s) at {}", self.n_days, self.time)
            }
            ScheduleKind::Unknown => "unspecified".to_string(),
        }
    }
}

/// What the scheduler loop should do next for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Schedule is off; poll for re-enablement.
    Disabled,
    /// Enabled but no next-run instant has been stored yet.
    Unset,
    /// Fire once `now >= instant`.
    At(DateTime<Utc>),
}

fn default_kind() -> ScheduleKind {
    ScheduleKind::Weekly
}
fn default_weekday() -> u8 {
    DEFAULT_WEEKDAY
}
fn default_day_of_month() -> u8 {
    1
}
fn default_n_days() -> u32 {
    3
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_and_formats() {
        let t: TimeOfDay = "9:05".parse().unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "09:05");
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn default_is_weekly_friday_midnight() {
        let s = ScheduleDescription::default();
        assert_eq!(s.kind, ScheduleKind::Weekly);
        assert_eq!(s.describe(), "weekly on Fri at 00:00");
        assert!(s.enabled);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn unknown_kind_deserialises_but_fails_validation() {
        let json = r#"{"kind":"fortnightly","time":"10:00"}"#;
        let s: ScheduleDescription = serde_json::from_str(json).unwrap();
        assert_eq!(s.kind, ScheduleKind::Unknown);
        assert!(matches!(s.validate(), Err(ScheduleError::UnsupportedKind)));
        assert_eq!(s.describe(), "unspecified");
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let t = TimeOfDay::new(9, 0).unwrap();
        assert!(ScheduleDescription::weekly(7, t).validate().is_err());
        assert!(ScheduleDescription::monthly(0, t).validate().is_err());
        assert!(ScheduleDescription::monthly(32, t).validate().is_err());
        assert!(ScheduleDescription::every_n_days(0, t).validate().is_err());
        assert!(ScheduleDescription::daily(t)
            .with_timezone("Mars/Olympus")
            .validate()
            .is_err());
    }

    #[test]
    fn describe_each_kind() {
        let t = TimeOfDay::new(9, 0).unwrap();
        assert_eq!(ScheduleDescription::daily(t).describe(), "daily at 09:00");
        assert_eq!(
            ScheduleDescription::monthly(31, t).describe(),
            "monthly on day 31 at 09:00"
        );
        assert_eq!(
            ScheduleDescription::every_n_days(3, t).describe(),
            "every 3 day(s) at 09:00"
        );
    }

    #[test]
    fn serde_round_trip_keeps_unused_fields() {
        let mut s = ScheduleDescription::monthly(15, TimeOfDay::new(7, 30).unwrap());
        s.weekday = 2;
        s.n_days = 9;
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""time":"07:30""#));
        let back: ScheduleDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
