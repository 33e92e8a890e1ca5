//! SQLite persistence for rotation domains, plus a roster-backed
//! [`Membership`](rolecycler_rotation::Membership) for running without an
//! external platform.

pub mod db;
pub mod error;
pub mod roster;
pub mod state_store;

pub use error::{Result, StoreError};
pub use roster::RosterMembership;
pub use state_store::SqliteStateStore;
