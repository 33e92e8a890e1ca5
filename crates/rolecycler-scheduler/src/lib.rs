//! `rolecycler-scheduler`: next-run computation and the background loop that
//! wakes rotation domains when they are due.
//!
//! # Schedule kinds
//!
//! | Kind          | Fires                                                      |
//! |---------------|------------------------------------------------------------|
//! | `Daily`       | Every day at HH:MM                                         |
//! | `Weekly`      | On `weekday` (0 = Monday) at HH:MM                         |
//! | `Monthly`     | On `day_of_month` at HH:MM, clamped to the month's last day |
//! | `EveryNDays`  | Every `n_days` days at HH:MM, counted from today           |
//!
//! All calendar arithmetic is done in the schedule's IANA timezone.

pub mod clock;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{LoopConfig, Schedulable, SchedulerEngine};
pub use error::{Result, ScheduleError};
pub use schedule::compute_next_run;
pub use types::{Marker, ScheduleDescription, ScheduleKind, TimeOfDay};
