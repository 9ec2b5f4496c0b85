use std::fmt;

use serde::Deserialize;

use super::{StatusLevel, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerStatus {
    #[default]
    None,
    Created,
    Running,
    Stopped,
}

impl ContainerStatus {
    pub fn is_terminal(self) -> bool {
        self == ContainerStatus::Stopped
    }

    /// The running-equivalent (steady) condition for a container.
    pub fn is_running(self) -> bool {
        self == ContainerStatus::Running
    }

    /// The single next ordinal status, if any.
    pub fn next(self) -> Option<ContainerStatus> {
        match self {
            ContainerStatus::None => Some(ContainerStatus::Created),
            ContainerStatus::Created => Some(ContainerStatus::Running),
            ContainerStatus::Running => Some(ContainerStatus::Stopped),
            ContainerStatus::Stopped => None,
        }
    }

    /// Task status implied by a container being in this status.
    pub fn task_status(self) -> TaskStatus {
        match self {
            ContainerStatus::None => TaskStatus::None,
            ContainerStatus::Created => TaskStatus::Created,
            ContainerStatus::Running => TaskStatus::Running,
            ContainerStatus::Stopped => TaskStatus::Stopped,
        }
    }

    /// Statuses that are reported to the event consumer.
    pub fn is_reportable(self) -> bool {
        self != ContainerStatus::None
    }
}

impl StatusLevel for ContainerStatus {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContainerStatus::None),
            1 => Some(ContainerStatus::Created),
            2 => Some(ContainerStatus::Running),
            3 => Some(ContainerStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::None => "NONE",
            ContainerStatus::Created => "CREATED",
            ContainerStatus::Running => "RUNNING",
            ContainerStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Last health check result reported for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
        };
        f.write_str(s)
    }
}
