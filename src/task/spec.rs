// src/task/spec.rs

//! Declarative task shapes as pushed by the control plane (or loaded from a
//! manifest). These are plain data; the live state lives in `Task`.

use std::collections::BTreeMap;

use crate::credentials::Credentials;
use crate::status::{DependencyCondition, TaskStatus};
use crate::types::VolumeScope;

/// Name of the per-task cgroup resource.
pub const CGROUP_RESOURCE: &str = "cgroup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDependency {
    pub container: String,
    pub condition: DependencyCondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub essential: bool,
    pub depends_on: Vec<ContainerDependency>,
    /// Names of volume resources this container mounts.
    pub volumes: Vec<String>,
    pub credentials_id: Option<String>,
    /// Regex; a matching stdout line marks the container healthy.
    pub healthy_on_stdout: Option<String>,
    /// Number of host ports to allocate.
    pub ports: u16,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            env: BTreeMap::new(),
            essential: true,
            depends_on: Vec::new(),
            volumes: Vec::new(),
            credentials_id: None,
            healthy_on_stdout: None,
            ports: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Cgroup {
        memory_limit_bytes: Option<u64>,
        cpu_weight: Option<u64>,
    },
    Volume {
        name: String,
        scope: VolumeScope,
    },
}

impl ResourceSpec {
    pub fn name(&self) -> &str {
        match self {
            ResourceSpec::Cgroup { .. } => CGROUP_RESOURCE,
            ResourceSpec::Volume { name, .. } => name,
        }
    }
}

/// One desired-state push for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: String,
    pub desired_status: TaskStatus,
    pub start_sequence: u64,
    /// Only meaningful when `desired_status` is `Stopped`; 0 = unassigned.
    pub stop_sequence: u64,
    pub execution_credentials_id: Option<String>,
    pub credentials: Vec<Credentials>,
    pub containers: Vec<ContainerSpec>,
    pub resources: Vec<ResourceSpec>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desired_status: TaskStatus::Running,
            start_sequence: 0,
            stop_sequence: 0,
            execution_credentials_id: None,
            credentials: Vec::new(),
            containers: Vec::new(),
            resources: Vec::new(),
        }
    }
}
