// src/planner/mod.rs

//! Entity transition planning.
//!
//! Given one container or resource and a read-only view of its task, decide
//! the next status to target and whether reaching it needs a runtime action
//! or is a pure bookkeeping bump.

mod container;
mod resource;

pub use container::plan_container;
pub use resource::plan_resource;

use crate::dependency::{BlockedOn, Resolution};

/// Why a transition has no next status (or carries extra context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReason {
    /// Known status is already at or beyond desired.
    PastDesiredStatus,
    /// Waiting on an ordering dependency; see `Transition::blocked_on`.
    DependencyBlocked,
    CredentialsNotResolved(String),
    /// Waiting for a dependent container to exit first.
    ShutdownOrder(String),
    Unresolvable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S> {
    pub next_status: Option<S>,
    pub action_required: bool,
    pub blocked_on: Option<BlockedOn>,
    pub reason: Option<PlanReason>,
}

impl<S> Transition<S> {
    pub(crate) fn parked(reason: PlanReason) -> Self {
        Self {
            next_status: None,
            action_required: false,
            blocked_on: None,
            reason: Some(reason),
        }
    }

    pub(crate) fn action(next: S) -> Self {
        Self {
            next_status: Some(next),
            action_required: true,
            blocked_on: None,
            reason: None,
        }
    }

    pub(crate) fn bump(next: S) -> Self {
        Self {
            next_status: Some(next),
            action_required: false,
            blocked_on: None,
            reason: None,
        }
    }

    /// Map a non-satisfied resolution to a parked transition.
    pub(crate) fn unresolved(resolution: Resolution) -> Option<Self> {
        let transition = match resolution {
            Resolution::Satisfied => return None,
            Resolution::Blocked(edge) => Self {
                next_status: None,
                action_required: false,
                blocked_on: Some(edge),
                reason: Some(PlanReason::DependencyBlocked),
            },
            Resolution::CredentialsNotResolved(id) => {
                Self::parked(PlanReason::CredentialsNotResolved(id))
            }
            Resolution::ShutdownOrder { dependent } => {
                Self::parked(PlanReason::ShutdownOrder(dependent))
            }
            Resolution::Unresolvable(why) => Self::parked(PlanReason::Unresolvable(why)),
        };
        Some(transition)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_on.is_some()
    }

    pub fn is_waiting_for_credentials(&self) -> bool {
        matches!(self.reason, Some(PlanReason::CredentialsNotResolved(_)))
    }
}
