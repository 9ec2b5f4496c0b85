use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::{ContainerStatus, StatusLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    None,
    Created,
    Running,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Stopped
    }

    /// Container status a container should be driven to for this task status.
    pub fn container_status(self) -> ContainerStatus {
        match self {
            TaskStatus::None => ContainerStatus::None,
            TaskStatus::Created => ContainerStatus::Created,
            TaskStatus::Running => ContainerStatus::Running,
            TaskStatus::Stopped => ContainerStatus::Stopped,
        }
    }

    /// Task `Created` is internal; only `Running` and `Stopped` go out.
    pub fn is_reportable(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Stopped)
    }
}

impl StatusLevel for TaskStatus {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::None),
            1 => Some(TaskStatus::Created),
            2 => Some(TaskStatus::Running),
            3 => Some(TaskStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::None => "NONE",
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(TaskStatus::None),
            "CREATED" => Ok(TaskStatus::Created),
            "RUNNING" => Ok(TaskStatus::Running),
            "STOPPED" => Ok(TaskStatus::Stopped),
            other => Err(format!("invalid task status: {other}")),
        }
    }
}
