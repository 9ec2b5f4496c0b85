// src/task/mod.rs

//! Live task state: a task, its containers and its resources.
//!
//! A `Task` is owned by exactly one managed-task loop, which is the only
//! place it is mutated. The only fields shared with other futures are the
//! atomics in `AppliedStatus` and `SentStatus`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::status::{ContainerStatus, ResourceStatus, TaskStatus};

mod applied;
mod container;
mod resource;
mod spec;

pub use applied::{AppliedStatus, SentStatus};
pub use container::{Container, ResourceDependency};
pub use resource::{Resource, ResourceContainerDependency};
pub use spec::{CGROUP_RESOURCE, ContainerDependency, ContainerSpec, ResourceSpec, TaskSpec};

pub type TaskId = String;

#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub known_status: TaskStatus,
    pub desired_status: TaskStatus,
    pub known_status_changed_at: Instant,
    pub start_sequence: u64,
    pub stop_sequence: u64,
    pub execution_credentials_id: Option<String>,
    pub containers: Vec<Container>,
    pub resources: Vec<Resource>,
    pub sent: Arc<SentStatus<TaskStatus>>,
    pub terminal_reason: Option<String>,
}

impl Task {
    /// Build a fresh task from its first push.
    ///
    /// Desired status starts at `None`; the first push is applied through the
    /// regular desired-status path so stop-sequence registration is uniform.
    pub fn new(spec: &TaskSpec, mut resources: Vec<Resource>) -> Task {
        let has_cgroup = resources.iter().any(|r| r.name == CGROUP_RESOURCE);

        let containers: Vec<Container> = spec
            .containers
            .iter()
            .map(|cs| {
                let mut container = Container::new(cs.clone());
                if has_cgroup {
                    container.resource_dependencies.push(ResourceDependency {
                        resource: CGROUP_RESOURCE.to_string(),
                        required: ResourceStatus::STEADY,
                    });
                }
                for volume in &cs.volumes {
                    container.resource_dependencies.push(ResourceDependency {
                        resource: volume.clone(),
                        required: ResourceStatus::STEADY,
                    });
                }
                container
            })
            .collect();

        // Resources are only torn down once every container has exited.
        for resource in &mut resources {
            for container in &containers {
                resource
                    .container_dependencies
                    .push(ResourceContainerDependency {
                        container: container.name().to_string(),
                        satisfied: ContainerStatus::Stopped,
                        dependent: ResourceStatus::TERMINAL,
                    });
            }
        }

        Task {
            id: spec.id.clone(),
            known_status: TaskStatus::None,
            desired_status: TaskStatus::None,
            known_status_changed_at: Instant::now(),
            start_sequence: spec.start_sequence,
            stop_sequence: 0,
            execution_credentials_id: spec.execution_credentials_id.clone(),
            containers,
            resources,
            sent: Arc::new(SentStatus::default()),
            terminal_reason: None,
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name() == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.name() == name)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.name == name)
    }

    /// Known == desired == Running.
    pub fn is_steady(&self) -> bool {
        self.known_status == TaskStatus::Running && self.desired_status == TaskStatus::Running
    }

    /// Record why the task is stopping. The first reason wins.
    pub fn set_terminal_reason(&mut self, reason: impl Into<String>) {
        if self.terminal_reason.is_none() {
            let reason = reason.into();
            info!(task = %self.id, %reason, "setting task terminal reason");
            self.terminal_reason = Some(reason);
        }
    }

    /// Force the task towards `Stopped` and propagate to every entity.
    pub fn stop(&mut self, reason: impl Into<String>) {
        self.set_terminal_reason(reason);
        if self.desired_status < TaskStatus::Stopped {
            self.desired_status = TaskStatus::Stopped;
        }
        self.update_desired_status();
    }

    /// Recompute desired statuses after a change to the task or any entity.
    ///
    /// An essential container that is known or desired terminal stops the
    /// task. The task's desired status is then pushed down to containers and
    /// resources, never lowering anything.
    pub fn update_desired_status(&mut self) {
        if !self.desired_status.is_terminal() {
            if self.known_status.is_terminal() {
                self.desired_status = TaskStatus::Stopped;
            } else if let Some(name) = self
                .containers
                .iter()
                .find(|c| {
                    c.is_essential()
                        && (c.known_status.is_terminal() || c.desired_status.is_terminal())
                })
                .map(|c| c.name().to_string())
            {
                info!(task = %self.id, container = %name, "essential container stopped; stopping task");
                self.desired_status = TaskStatus::Stopped;
                self.set_terminal_reason(format!("Essential container in task exited: {name}"));
            }
        }

        let container_target = self.desired_status.container_status();
        for container in &mut self.containers {
            if container.desired_status < container_target {
                container.desired_status = container_target;
            }
        }

        let resource_target = match self.desired_status {
            TaskStatus::None => None,
            TaskStatus::Created | TaskStatus::Running => Some(ResourceStatus::STEADY),
            TaskStatus::Stopped => Some(ResourceStatus::TERMINAL),
        };
        if let Some(target) = resource_target {
            for resource in &mut self.resources {
                if resource.desired_status < target {
                    resource.desired_status = target;
                }
            }
        }
    }

    /// Derive the task's known status from its entities.
    ///
    /// The task sits at the lowest status implied by any container or
    /// resource. It does not advance while an essential container has
    /// stopped and the earliest container is still running. Returns the new
    /// status when it advanced.
    pub fn update_known_status(&mut self) -> Option<TaskStatus> {
        let earliest = self.containers.iter().map(|c| c.known_status).min()?;

        let essential_stopped = self
            .containers
            .iter()
            .any(|c| c.is_essential() && c.known_status.is_terminal());
        if essential_stopped && earliest.is_running() {
            debug!(task = %self.id, "essential container stopped while others run; holding task status");
            return None;
        }

        let from_resources = self.resources.iter().map(Resource::task_status).min();
        let derived = match from_resources {
            Some(r) => earliest.task_status().min(r),
            None => earliest.task_status(),
        };

        if derived > self.known_status {
            debug!(task = %self.id, from = %self.known_status, to = %derived, "task known status advanced");
            self.known_status = derived;
            self.known_status_changed_at = Instant::now();
            Some(derived)
        } else {
            None
        }
    }

    /// Recompute desired then known status. Returns the new known status
    /// when it advanced.
    pub fn update_status(&mut self) -> Option<TaskStatus> {
        self.update_desired_status();
        let changed = self.update_known_status();
        if changed.is_some() {
            self.update_desired_status();
        }
        changed
    }
}
