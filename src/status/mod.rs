// src/status/mod.rs

//! Ordered lifecycle statuses for tasks, containers and resources.
//!
//! Every status enum is totally ordered and encodes to a small ordinal so it
//! can live inside an atomic (see `task::AppliedStatus`).

use std::fmt;

mod container;
mod resource;
mod task;

pub use container::{ContainerStatus, HealthStatus};
pub use resource::ResourceStatus;
pub use task::TaskStatus;

/// A status that can be stored as a `u8` ordinal.
pub trait StatusLevel: Copy + Ord + Default + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn ordinal(self) -> u8;
    fn from_ordinal(value: u8) -> Option<Self>;
}

/// Condition attached to a container `depends_on` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyCondition {
    /// Peer has been created.
    Start,
    /// Peer has exited.
    Complete,
    /// Peer has exited with code zero.
    Success,
    /// Peer's last health report was healthy.
    Healthy,
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyCondition::Start => "START",
            DependencyCondition::Complete => "COMPLETE",
            DependencyCondition::Success => "SUCCESS",
            DependencyCondition::Healthy => "HEALTHY",
        };
        f.write_str(s)
    }
}
