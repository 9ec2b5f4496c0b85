use std::fmt;

use super::{StatusLevel, TaskStatus};

/// Resource lifecycle. `Created` is the steady state, `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ResourceStatus {
    #[default]
    None,
    Created,
    Removed,
}

impl ResourceStatus {
    pub const STEADY: ResourceStatus = ResourceStatus::Created;
    pub const TERMINAL: ResourceStatus = ResourceStatus::Removed;

    pub fn is_terminal(self) -> bool {
        self >= Self::TERMINAL
    }

    pub fn next(self) -> ResourceStatus {
        match self {
            ResourceStatus::None => ResourceStatus::Created,
            ResourceStatus::Created | ResourceStatus::Removed => ResourceStatus::Removed,
        }
    }

    /// Task status implied by a resource being in this status.
    pub fn task_status(self) -> TaskStatus {
        match self {
            ResourceStatus::None => TaskStatus::None,
            ResourceStatus::Created => TaskStatus::Running,
            ResourceStatus::Removed => TaskStatus::Stopped,
        }
    }
}

impl StatusLevel for ResourceStatus {
    fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResourceStatus::None),
            1 => Some(ResourceStatus::Created),
            2 => Some(ResourceStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::None => "NONE",
            ResourceStatus::Created => "CREATED",
            ResourceStatus::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}
