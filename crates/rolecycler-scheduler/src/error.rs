use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A schedule field is outside its valid range.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The schedule kind is not one this build understands.
    #[error("Unsupported schedule kind")]
    UnsupportedKind,

    /// The timezone is not a known IANA identifier.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// `HH:MM` text could not be parsed.
    #[error("Invalid time of day: {0}")]
    InvalidTime(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
