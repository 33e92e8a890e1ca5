use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use rolecycler_core::{DomainId, MemberId};
use thiserror::Error;

use crate::report::RunReport;
use crate::state::DomainState;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The domain's eligibility group or assigned status is not set up.
    #[error("not configured: {0}")]
    Unconfigured(String),

    /// The platform call itself failed.
    #[error("call failed: {0}")]
    Call(String),
}

/// Failure reported by a [`StateStore`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PersistError(pub String);

/// The platform that knows who is eligible and applies the assigned status.
///
/// Calls are never retried by the engine.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Fresh snapshot of the members eligible in `domain`.
    ///
    /// Returns [`CollaboratorError::Unconfigured`] when the eligibility group
    /// or the assigned status cannot be resolved.
    async fn resolve_eligibility_pool(
        &self,
        domain: DomainId,
    ) -> Result<BTreeSet<MemberId>, CollaboratorError>;

    async fn grant_status(&self, domain: DomainId, member: MemberId)
        -> Result<(), CollaboratorError>;

    async fn revoke_status(&self, domain: DomainId, member: MemberId)
        -> Result<(), CollaboratorError>;

    /// Delay the engine waits between consecutive grant/revoke calls.
    fn pacing(&self) -> Duration {
        Duration::ZERO
    }
}

/// Durable storage for domain snapshots.
///
/// `persist` must replace the stored snapshot atomically: after a crash the
/// store holds either the previous or the new snapshot, never a mix.
///
/// A store that several engines (or processes) share must also implement the
/// run lease, so that only one of them mutates a domain at a time. The
/// defaults grant every lease and fit a store owned by a single engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, domain: DomainId) -> Result<Option<DomainState>, PersistError>;

    async fn persist(&self, state: &DomainState) -> Result<(), PersistError>;

    /// Append a committed run to the history. Optional.
    async fn record_run(&self, _report: &RunReport) -> Result<(), PersistError> {
        Ok(())
    }

    /// Take (or renew) the run lease on `domain` for `owner`, valid for `ttl`.
    /// Returns `false` while a different owner holds an unexpired lease.
    async fn acquire_lease(
        &self,
        _domain: DomainId,
        _owner: &str,
        _ttl: Duration,
    ) -> Result<bool, PersistError> {
        Ok(true)
    }

    /// Drop the lease if `owner` still holds it.
    async fn release_lease(&self, _domain: DomainId, _owner: &str) -> Result<(), PersistError> {
        Ok(())
    }

    /// Whether anyone holds an unexpired lease on `domain`.
    async fn lease_held(&self, _domain: DomainId) -> Result<bool, PersistError> {
        Ok(false)
    }
}
