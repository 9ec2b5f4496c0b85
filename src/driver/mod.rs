// src/driver/mod.rs

//! Pluggable runtime driver abstraction.
//!
//! The engine talks to a `RuntimeDriver` instead of a concrete container
//! runtime. Production uses [`ProcessDriver`], which runs each container's
//! command as a host process; tests provide their own driver that records
//! requests and scripts replies.
//!
//! A driver must always answer a dispatched transition with a
//! `StatusReport`, including on failure.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::engine::ContainerChange;
use crate::status::{ContainerStatus, HealthStatus};
use crate::task::{Container, TaskId};

mod ports;
mod process;
mod stdout;

pub use ports::PortAllocator;
pub use process::ProcessDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    /// The image (here: the command) could not be obtained.
    ImagePull,
    /// The runtime did not answer in time; the outcome is unknown.
    Timeout,
    /// A stop attempt failed in a way that is worth waiting out.
    StopRetriable,
    /// The request was sent but its completion could not be confirmed.
    IoAmbiguous,
    NotFound,
    Other,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverErrorKind::ImagePull => "CannotPullContainerError",
            DriverErrorKind::Timeout => "DockerTimeoutError",
            DriverErrorKind::StopRetriable => "CannotStopContainerError",
            DriverErrorKind::IoAmbiguous => "ContainerIOAmbiguousError",
            DriverErrorKind::NotFound => "ContainerNotFoundError",
            DriverErrorKind::Other => "ContainerRuntimeError",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Errors after which the runtime may still complete the request on its
    /// own; a later authoritative event settles the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::Timeout | DriverErrorKind::StopRetriable
        )
    }

    /// Errors that leave it unknown whether a start actually happened.
    pub fn may_have_started(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::Timeout | DriverErrorKind::IoAmbiguous
        )
    }
}

/// What a driver needs to know about a container to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub task_id: TaskId,
    pub name: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub healthy_on_stdout: Option<String>,
    pub ports: u16,
    pub runtime_id: Option<String>,
    pub known_status: ContainerStatus,
}

impl ContainerSnapshot {
    pub fn of(task_id: &str, container: &Container) -> Self {
        Self {
            task_id: task_id.to_string(),
            name: container.name().to_string(),
            command: container.spec.command.clone(),
            env: container.spec.env.clone(),
            healthy_on_stdout: container.spec.healthy_on_stdout.clone(),
            ports: container.spec.ports,
            runtime_id: container.runtime_id.clone(),
            known_status: container.known_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub container: ContainerSnapshot,
    pub target: ContainerStatus,
}

impl TransitionRequest {
    pub fn new(task_id: &str, container: &Container, target: ContainerStatus) -> Self {
        Self {
            container: ContainerSnapshot::of(task_id, container),
            target,
        }
    }
}

/// Outcome of one dispatched transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ContainerStatus,
    pub runtime_id: Option<String>,
    pub exit_code: Option<i32>,
    pub health: Option<HealthStatus>,
    pub error: Option<DriverError>,
}

impl StatusReport {
    pub fn ok(status: ContainerStatus) -> Self {
        Self {
            status,
            runtime_id: None,
            exit_code: None,
            health: None,
            error: None,
        }
    }

    pub fn failed(status: ContainerStatus, error: DriverError) -> Self {
        Self {
            error: Some(error),
            ..Self::ok(status)
        }
    }

    pub fn with_runtime_id(mut self, runtime_id: impl Into<String>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait RuntimeDriver: Send + Sync + fmt::Debug {
    /// Drive one container to `request.target`.
    fn transition(&self, request: TransitionRequest) -> DriverFuture<'_, StatusReport>;

    /// Read-only check of running containers. Returns the changes the
    /// runtime observed but has not reported yet.
    fn verify(&self, containers: Vec<ContainerSnapshot>) -> DriverFuture<'_, Vec<ContainerChange>>;

    /// Remove a container's runtime state during the task sweep.
    fn remove_container(
        &self,
        container: ContainerSnapshot,
    ) -> DriverFuture<'_, Result<(), DriverError>>;

    /// Release addressing (host ports) registered for a task.
    fn release_addressing(&self, task_id: TaskId) -> DriverFuture<'_, ()>;
}
