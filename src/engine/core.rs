// src/engine/core.rs

//! Pure per-task state machine.
//!
//! `TaskCore` consumes [`TaskEvent`]s and planning requests and produces:
//! - an updated task state
//! - a list of [`TaskCommand`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::ManagedTask`) is responsible for
//! reading the task's channels, running dispatched actions and timers, and
//! cleanup. The core has no channels and performs no IO, so it can be
//! driven directly from tests.

use crate::credentials::CredentialsManager;
use crate::emitter::{container_state_change, task_state_change};
use crate::status::TaskStatus;
use crate::task::Task;
use crate::types::ImagePullBehavior;

use super::event_handlers::{
    handle_container_change, handle_desired_status_change, handle_managed_agent_change,
    handle_resource_state_change,
};
use super::progress::{ProgressStep, handle_unable_to_transition, progress_task};
use super::{ContainerEvent, DesiredStatusChange, TaskCommand, TaskEvent};

#[derive(Debug)]
pub struct TaskCore {
    task: Task,
    pull_behavior: ImagePullBehavior,
    initial_push: Option<DesiredStatusChange>,
}

impl TaskCore {
    pub fn new(task: Task, pull_behavior: ImagePullBehavior) -> Self {
        Self {
            task,
            pull_behavior,
            initial_push: None,
        }
    }

    /// The push that created the task; applied by [`TaskCore::initialize`].
    pub fn with_initial_push(mut self, change: DesiredStatusChange) -> Self {
        self.initial_push = Some(change);
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    pub fn known_status(&self) -> TaskStatus {
        self.task.known_status
    }

    pub fn desired_status(&self) -> TaskStatus {
        self.task.desired_status
    }

    pub fn is_steady(&self) -> bool {
        self.task.is_steady()
    }

    /// First step of a task's life (fresh or re-hydrated): apply the initial
    /// push, propagate statuses, and re-emit anything not yet acknowledged.
    pub fn initialize(&mut self) -> Vec<TaskCommand> {
        let mut commands = Vec::new();
        if let Some(change) = self.initial_push.take() {
            commands.extend(handle_desired_status_change(&mut self.task, change));
        }
        self.task.update_status();

        for container in &self.task.containers {
            if let Some(event) = container_state_change(&self.task.id, container) {
                commands.push(TaskCommand::Emit(event));
            }
        }
        if let Some(event) = task_state_change(&self.task) {
            commands.push(TaskCommand::Emit(event));
        }
        commands
    }

    /// Handle one inbound event.
    pub fn step(&mut self, event: TaskEvent) -> Vec<TaskCommand> {
        match event {
            TaskEvent::DesiredStatus(change) => handle_desired_status_change(&mut self.task, change),
            TaskEvent::Container(ContainerEvent::Status(change)) => {
                handle_container_change(&mut self.task, self.pull_behavior, change)
            }
            TaskEvent::Container(ContainerEvent::ManagedAgent(change)) => {
                handle_managed_agent_change(&mut self.task, change)
            }
            TaskEvent::Resource(change) => handle_resource_state_change(&mut self.task, change),
        }
    }

    /// One planning pass. See [`progress_task`].
    pub fn progress(&mut self, credentials: &dyn CredentialsManager) -> ProgressStep {
        progress_task(&mut self.task, credentials)
    }

    /// Escalation after a bounded credentials wait ran out.
    pub fn handle_unable_to_transition(&mut self) -> Vec<TaskCommand> {
        handle_unable_to_transition(&mut self.task)
    }
}
