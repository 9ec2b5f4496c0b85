// src/engine/mod.rs

//! Per-task lifecycle engine.
//!
//! This module ties together:
//! - the pure per-task state machine ([`core`], [`event_handlers`],
//!   [`progress`]) that turns events into commands,
//! - the async shell ([`runtime`]) that owns one task, services its three
//!   inbound channels and runs dispatched actions,
//! - the host-wide [`registry`] and the [`TaskEngine`] facade that routes
//!   control-plane pushes and runtime events to the right task.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::AgentSection;
use crate::driver::{DriverError, StatusReport, TransitionRequest};
use crate::emitter::StateChangeEvent;
use crate::resources::TaskResource;
use crate::status::{ContainerStatus, HealthStatus, ResourceStatus, TaskStatus};
use crate::task::TaskId;
use crate::types::ImagePullBehavior;

pub mod core;
pub mod event_handlers;
pub mod progress;
pub mod registry;
pub mod runtime;
mod task_engine;

pub use core::TaskCore;
pub use progress::{ProgressOutcome, ProgressStep};
pub use registry::{TaskHandle, TaskRegistry};
pub use runtime::ManagedTask;
pub use task_engine::{EngineParts, TaskEngine};

/// A control-plane push for an existing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredStatusChange {
    pub desired: TaskStatus,
    /// Stop sequence assigned with a push to `Stopped`; 0 = none.
    pub stop_sequence: u64,
}

impl DesiredStatusChange {
    pub fn new(desired: TaskStatus) -> Self {
        Self {
            desired,
            stop_sequence: 0,
        }
    }

    pub fn stop(stop_sequence: u64) -> Self {
        Self {
            desired: TaskStatus::Stopped,
            stop_sequence,
        }
    }
}

/// A container status report, from a dispatched action, a bookkeeping bump
/// or the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerChange {
    pub container: String,
    pub status: ContainerStatus,
    pub runtime_id: Option<String>,
    pub exit_code: Option<i32>,
    pub health: Option<HealthStatus>,
    pub error: Option<DriverError>,
}

impl ContainerChange {
    pub fn new(container: impl Into<String>, status: ContainerStatus) -> Self {
        Self {
            container: container.into(),
            status,
            runtime_id: None,
            exit_code: None,
            health: None,
            error: None,
        }
    }

    pub fn from_report(container: impl Into<String>, report: StatusReport) -> Self {
        Self {
            container: container.into(),
            status: report.status,
            runtime_id: report.runtime_id,
            exit_code: report.exit_code,
            health: report.health,
            error: report.error,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_error(mut self, error: DriverError) -> Self {
        self.error = Some(error);
        self
    }
}

/// A managed agent inside a container changed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedAgentChange {
    pub container: String,
    pub agent: String,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Status(ContainerChange),
    ManagedAgent(ManagedAgentChange),
}

/// Completion of a resource transition (or a bookkeeping bump).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChange {
    pub resource: String,
    pub status: ResourceStatus,
    pub error: Option<String>,
}

impl ResourceChange {
    pub fn new(resource: impl Into<String>, status: ResourceStatus) -> Self {
        Self {
            resource: resource.into(),
            status,
            error: None,
        }
    }
}

/// Everything a task loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    DesiredStatus(DesiredStatusChange),
    Container(ContainerEvent),
    Resource(ResourceChange),
}

/// A runtime-originated event addressed to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub task_id: TaskId,
    pub event: ContainerEvent,
}

/// Side effects requested by the core. Executed by the shell without
/// blocking the task loop.
#[derive(Debug)]
pub enum TaskCommand {
    /// Dispatch a runtime action; its report comes back as a container event.
    TransitionContainer(TransitionRequest),
    /// Run a resource transition; its result comes back as a resource event.
    TransitionResource {
        resource: String,
        handler: Arc<dyn TaskResource>,
        target: ResourceStatus,
    },
    /// Bookkeeping bump routed back through the container event path.
    PostContainerStatus {
        container: String,
        status: ContainerStatus,
    },
    /// Bookkeeping bump routed back through the resource event path.
    PostResourceStatus {
        resource: String,
        status: ResourceStatus,
    },
    Emit(StateChangeEvent),
    RegisterStopSequence(u64),
}

/// Timing and policy knobs for managed tasks.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub image_pull_behavior: ImagePullBehavior,
    pub steady_state_poll_interval: Duration,
    pub steady_state_poll_jitter: Duration,
    pub dependency_poll_interval: Duration,
    pub credentials_wait_timeout: Duration,
    pub task_cleanup_wait: Duration,
    pub task_cleanup_jitter: Duration,
    pub stopped_report_interval: Duration,
    pub stopped_report_max_attempts: u32,
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            image_pull_behavior: ImagePullBehavior::Default,
            steady_state_poll_interval: Duration::from_secs(5 * 60),
            steady_state_poll_jitter: Duration::from_secs(30),
            dependency_poll_interval: Duration::from_secs(2),
            credentials_wait_timeout: Duration::from_secs(60),
            task_cleanup_wait: Duration::from_secs(3 * 60 * 60),
            task_cleanup_jitter: Duration::ZERO,
            stopped_report_interval: Duration::from_secs(5),
            stopped_report_max_attempts: 72,
            channel_capacity: 64,
        }
    }
}

impl From<&AgentSection> for EngineSettings {
    fn from(agent: &AgentSection) -> Self {
        Self {
            image_pull_behavior: agent.image_pull_behavior,
            steady_state_poll_interval: agent.steady_state_poll_interval,
            steady_state_poll_jitter: agent.steady_state_poll_jitter,
            dependency_poll_interval: agent.dependency_poll_interval,
            credentials_wait_timeout: agent.credentials_wait_timeout,
            task_cleanup_wait: agent.task_cleanup_wait,
            task_cleanup_jitter: agent.task_cleanup_jitter,
            stopped_report_interval: agent.stopped_report_interval,
            stopped_report_max_attempts: agent.stopped_report_max_attempts,
            channel_capacity: agent.event_channel_capacity,
        }
    }
}

/// `base` shifted by a uniform offset in `[-jitter, +jitter]`.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let span = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    let offset = rand::rng().random_range(0..=span.saturating_mul(2));
    let shifted = base.saturating_add(Duration::from_millis(offset));
    shifted.saturating_sub(jitter)
}
