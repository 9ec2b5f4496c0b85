// src/task/container.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::status::{ContainerStatus, HealthStatus, ResourceStatus};

use super::applied::{AppliedStatus, SentStatus};
use super::spec::ContainerSpec;

/// A container's `Created` transition waits for a resource to reach `required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDependency {
    pub resource: String,
    pub required: ResourceStatus,
}

/// Live state of one container of a task.
#[derive(Debug)]
pub struct Container {
    pub spec: ContainerSpec,
    pub runtime_id: Option<String>,
    pub known_status: ContainerStatus,
    pub desired_status: ContainerStatus,
    pub applied: AppliedStatus<ContainerStatus>,
    pub sent: Arc<SentStatus<ContainerStatus>>,
    pub resource_dependencies: Vec<ResourceDependency>,
    pub exit_code: Option<i32>,
    pub health: HealthStatus,
    /// Last error reported while applying a transition.
    pub applying_error: Option<String>,
    /// Set once the Stopped -> Running re-stop has been dispatched.
    pub restop_fired: bool,
    pub managed_agents: BTreeMap<String, String>,
}

impl Container {
    pub fn new(spec: ContainerSpec) -> Self {
        Self {
            spec,
            runtime_id: None,
            known_status: ContainerStatus::None,
            desired_status: ContainerStatus::None,
            applied: AppliedStatus::default(),
            sent: Arc::new(SentStatus::default()),
            resource_dependencies: Vec::new(),
            exit_code: None,
            health: HealthStatus::Unknown,
            applying_error: None,
            restop_fired: false,
            managed_agents: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_essential(&self) -> bool {
        self.spec.essential
    }

    /// Desired terminal and never created: this container will not start.
    pub fn will_never_start(&self) -> bool {
        self.desired_status.is_terminal() && self.known_status < ContainerStatus::Created
    }
}
