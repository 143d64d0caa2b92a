//! The cross-service coordinator seam.
//!
//! The coordinator issues the replication lease and records one action per
//! sequence advancement. Only the four operations used by the engine are
//! modeled; the coordinator's own protocol lives behind the implementations.

use std::{fmt, future::Future};

use crate::{sequence::Sequence, BoxError};

/// Operations the engine needs from the coordinator.
pub trait Mediator {
    /// Acquires the cross-service lease for this job.
    fn reserve_access(&self) -> impl Future<Output = Result<(), MediatorError>> + Send;

    /// Records the intent to advance the pointer to `state`.
    fn create_action(
        &self,
        state: Sequence,
    ) -> impl Future<Output = Result<ActionId, MediatorError>> + Send;

    /// Transitions a previously created action to a terminal status.
    fn update_action(
        &self,
        action: &ActionId,
        update: ActionUpdate,
    ) -> impl Future<Output = Result<(), MediatorError>> + Send;

    /// Releases the lease. Callers treat failures as best-effort.
    fn remove_lock(&self) -> impl Future<Output = Result<(), MediatorError>> + Send;
}

/// Identifier of a coordinator-owned action record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Completed => "COMPLETED",
            ActionStatus::Failed => "FAILED",
        }
    }
}

/// Payload for [`Mediator::update_action`].
#[derive(Debug, Clone)]
pub struct ActionUpdate {
    pub status: ActionStatus,
    /// Failure description, set on FAILED transitions.
    pub error: Option<String>,
    /// Inspector output attached to COMPLETED transitions.
    pub info: Option<serde_json::Value>,
}

impl ActionUpdate {
    pub fn completed(info: Option<serde_json::Value>) -> Self {
        Self {
            status: ActionStatus::Completed,
            error: None,
            info,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: ActionStatus::Failed,
            error: Some(error.to_string()),
            info: None,
        }
    }
}

/// A coordinator request failed.
#[derive(Debug, thiserror::Error)]
#[error("mediator request failed: {0}")]
pub struct MediatorError(#[source] pub BoxError);

/// Mediator used when coordination is disabled: every operation succeeds
/// without talking to anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMediator;

impl Mediator for NoopMediator {
    async fn reserve_access(&self) -> Result<(), MediatorError> {
        Ok(())
    }

    async fn create_action(&self, _state: Sequence) -> Result<ActionId, MediatorError> {
        Ok(ActionId::new("untracked"))
    }

    async fn update_action(
        &self,
        _action: &ActionId,
        _update: ActionUpdate,
    ) -> Result<(), MediatorError> {
        Ok(())
    }

    async fn remove_lock(&self) -> Result<(), MediatorError> {
        Ok(())
    }
}
