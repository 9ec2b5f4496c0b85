// src/task/resource.rs

use std::sync::Arc;

use crate::resources::TaskResource;
use crate::status::{ContainerStatus, ResourceStatus, TaskStatus};

use super::applied::AppliedStatus;

/// A resource may only reach `dependent` once `container` is at least `satisfied`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContainerDependency {
    pub container: String,
    pub satisfied: ContainerStatus,
    pub dependent: ResourceStatus,
}

#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub handler: Arc<dyn TaskResource>,
    pub known_status: ResourceStatus,
    pub desired_status: ResourceStatus,
    pub applied: AppliedStatus<ResourceStatus>,
    pub container_dependencies: Vec<ResourceContainerDependency>,
    pub applying_error: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskResource>) -> Self {
        Self {
            name: name.into(),
            handler,
            known_status: ResourceStatus::None,
            desired_status: ResourceStatus::None,
            applied: AppliedStatus::default(),
            container_dependencies: Vec::new(),
            applying_error: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.handler.kind()
    }

    pub fn task_status(&self) -> TaskStatus {
        self.known_status.task_status()
    }
}
