pub mod config;
pub mod error;
pub mod types;

pub use error::{CyclerError, Result};
pub use types::{DomainId, MemberId};
