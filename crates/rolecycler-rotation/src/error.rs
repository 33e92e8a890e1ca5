use rolecycler_core::DomainId;
use rolecycler_scheduler::ScheduleError;
use thiserror::Error;

/// Errors surfaced by the rotation engine.
///
/// Per-member grant/revoke failures are not errors: they are recorded in the
/// [`RunReport`](crate::report::RunReport) and the run carries on.
#[derive(Debug, Error)]
pub enum RotationError {
    /// Eligibility/assignment target unresolved or schedule unusable.
    /// Raised before any state is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The eligibility pool could not be fetched for a reason other than
    /// configuration (e.g. the platform is unreachable).
    #[error("Eligibility pool unavailable: {0}")]
    PoolUnavailable(String),

    /// Loading or committing domain state failed. A run that ends with this
    /// error has not been committed.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Another run holds the domain lock.
    #[error("A run is already in progress for domain {domain}")]
    RunInProgress { domain: DomainId },

    /// No state exists for the domain yet.
    #[error("Domain not found: {domain}")]
    DomainNotFound { domain: DomainId },

    /// A caller-supplied value is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RotationError {
    /// Short stable code string for callers that render errors.
    pub fn code(&self) -> &'static str {
        match self {
            RotationError::Configuration(_) => "CONFIG_ERROR",
            RotationError::PoolUnavailable(_) => "POOL_UNAVAILABLE",
            RotationError::Persistence(_) => "PERSISTENCE_FAILURE",
            RotationError::RunInProgress { .. } => "RUN_IN_PROGRESS",
            RotationError::DomainNotFound { .. } => "DOMAIN_NOT_FOUND",
            RotationError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}

impl From<ScheduleError> for RotationError {
    fn from(e: ScheduleError) -> Self {
        RotationError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RotationError>;
