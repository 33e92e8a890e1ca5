//! `rolecycler-rotation`: fair rotation of a temporary status through a pool
//! of eligible members.
//!
//! A [`RotationEngine`] owns any number of independent domains. Each run
//! revokes the status from current holders, draws the next batch from the
//! domain's [`FairnessQueue`], grants the status to it and commits the new
//! [`DomainState`] in one write. [`DomainTrigger`] plugs a domain into the
//! scheduler loop from `rolecycler-scheduler`.

pub mod collaborator;
pub mod coordinator;
pub mod duration;
pub mod error;
pub mod fairness;
pub mod report;
pub mod state;
pub mod stats;
pub mod trigger;

pub use collaborator::{CollaboratorError, Membership, PersistError, StateStore};
pub use coordinator::{EngineOptions, RotationEngine};
pub use duration::{DurationTracker, HoldRecord};
pub use error::{Result, RotationError};
pub use fairness::{Batch, FairnessQueue};
pub use report::{
    DomainStatus, MemberFailure, MemberStat, RunPhase, RunReport, RunTrigger, StatusAction,
    UnderSupply,
};
pub use state::{DomainState, STATE_VERSION};
pub use stats::{format_duration, stats_csv};
pub use trigger::DomainTrigger;
