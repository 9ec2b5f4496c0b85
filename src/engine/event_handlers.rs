// src/engine/event_handlers.rs

//! Event handlers for the per-task core.
//!
//! Each handler mutates the task in response to one inbound event and
//! returns the commands the shell must execute. Handlers never block and
//! never touch the runtime directly.

use tracing::{debug, error, info, warn};

use crate::driver::{DriverError, TransitionRequest};
use crate::emitter::{
    ManagedAgentStateChange, StateChangeEvent, container_state_change, task_state_change,
};
use crate::status::{ContainerStatus, ResourceStatus};
use crate::task::Task;
use crate::types::ImagePullBehavior;

use super::{
    ContainerChange, DesiredStatusChange, ManagedAgentChange, ResourceChange, TaskCommand,
};

/// Apply a control-plane push. Only strictly higher desired statuses are
/// taken; stale or repeated pushes are dropped.
pub fn handle_desired_status_change(
    task: &mut Task,
    change: DesiredStatusChange,
) -> Vec<TaskCommand> {
    if change.desired <= task.desired_status {
        debug!(
            task = %task.id,
            current = %task.desired_status,
            requested = %change.desired,
            "redundant desired status change; ignoring"
        );
        return Vec::new();
    }

    let mut commands = Vec::new();
    if change.desired.is_terminal() && change.stop_sequence != 0 && task.stop_sequence == 0 {
        task.stop_sequence = change.stop_sequence;
        commands.push(TaskCommand::RegisterStopSequence(change.stop_sequence));
    }

    info!(
        task = %task.id,
        from = %task.desired_status,
        to = %change.desired,
        stop_sequence = task.stop_sequence,
        "desired status changed"
    );
    task.desired_status = change.desired;
    task.update_desired_status();
    commands
}

/// Apply a container status report.
///
/// Reports at or below the known status are dropped, except that a stopped
/// container reported running again gets exactly one re-stop. Reports
/// carrying an error are interpreted by the status that was attempted.
pub fn handle_container_change(
    task: &mut Task,
    pull_behavior: ImagePullBehavior,
    change: ContainerChange,
) -> Vec<TaskCommand> {
    let Some(idx) = task
        .containers
        .iter()
        .position(|c| c.name() == change.container)
    else {
        warn!(task = %task.id, container = %change.container, "status report for unknown container");
        return Vec::new();
    };

    let mut commands = Vec::new();
    let known = task.containers[idx].known_status;

    if change.status.is_running() && known.is_terminal() {
        let container = &mut task.containers[idx];
        if !container.restop_fired {
            container.restop_fired = true;
            warn!(
                task = %task.id,
                container = %change.container,
                "stopped container reported running; stopping it again"
            );
            commands.push(TaskCommand::TransitionContainer(TransitionRequest::new(
                &task.id,
                container,
                ContainerStatus::Stopped,
            )));
        } else {
            debug!(task = %task.id, container = %change.container, "re-stop already issued; ignoring");
        }
        return commands;
    }

    if change.status <= known {
        let container = &mut task.containers[idx];
        if change.status == known && change.error.is_none() {
            if let Some(health) = change.health.filter(|h| *h != container.health) {
                debug!(task = %task.id, container = %change.container, %health, "health updated");
                container.health = health;
            }
        }
        debug!(
            task = %task.id,
            container = %change.container,
            known = %known,
            reported = %change.status,
            "redundant container status; ignoring"
        );
        return commands;
    }

    if let Some(err) = change.error.clone() {
        task.containers[idx].applying_error = Some(err.to_string());
        let accept = handle_transition_error(task, idx, pull_behavior, &change, &err, &mut commands);
        if !accept {
            return commands;
        }
    }

    let container = &mut task.containers[idx];
    container.known_status = change.status;
    if change.runtime_id.is_some() {
        container.runtime_id = change.runtime_id;
    }
    if change.exit_code.is_some() {
        container.exit_code = change.exit_code;
    }
    if let Some(health) = change.health {
        container.health = health;
    }
    if change.status.is_terminal() && container.desired_status < ContainerStatus::Stopped {
        container.desired_status = ContainerStatus::Stopped;
    }
    info!(
        task = %task.id,
        container = %change.container,
        status = %change.status,
        exit_code = ?container.exit_code,
        "container known status advanced"
    );

    if let Some(event) = container_state_change(&task.id, container) {
        commands.push(TaskCommand::Emit(event));
    }
    emit_task_status(task, &mut commands);
    commands
}

/// Returns whether the reported status should still be recorded as known.
fn handle_transition_error(
    task: &mut Task,
    idx: usize,
    pull_behavior: ImagePullBehavior,
    change: &ContainerChange,
    err: &DriverError,
    commands: &mut Vec<TaskCommand>,
) -> bool {
    let name = change.container.clone();
    match change.status {
        ContainerStatus::None => false,
        ContainerStatus::Created => {
            error!(task = %task.id, container = %name, error = %err, "error creating container");
            task.containers[idx].desired_status = ContainerStatus::Stopped;
            if pull_behavior.requires_fresh_image() {
                warn!(
                    task = %task.id,
                    container = %name,
                    ?pull_behavior,
                    "pull behavior requires a fresh image; stopping task"
                );
                task.stop(format!("{}: {}", name, err));
            } else if task.containers[idx].is_essential() {
                task.stop(format!("{}: {}", name, err));
            } else {
                task.update_desired_status();
            }
            false
        }
        ContainerStatus::Stopped => {
            task.containers[idx].desired_status = ContainerStatus::Stopped;
            if err.is_transient() {
                warn!(
                    task = %task.id,
                    container = %name,
                    error = %err,
                    "stop did not complete; waiting for the runtime to report the exit"
                );
                false
            } else {
                warn!(
                    task = %task.id,
                    container = %name,
                    error = %err,
                    "error stopping container; treating it as stopped"
                );
                true
            }
        }
        ContainerStatus::Running => {
            error!(task = %task.id, container = %name, error = %err, "error starting container");
            let container = &mut task.containers[idx];
            container.desired_status = ContainerStatus::Stopped;
            if err.may_have_started() && container.applied.try_claim(ContainerStatus::Stopped) {
                info!(
                    task = %task.id,
                    container = %name,
                    "start outcome unknown; stopping container"
                );
                commands.push(TaskCommand::TransitionContainer(TransitionRequest::new(
                    &task.id,
                    container,
                    ContainerStatus::Stopped,
                )));
            }
            task.update_desired_status();
            false
        }
    }
}

/// Apply a resource transition result.
pub fn handle_resource_state_change(task: &mut Task, change: ResourceChange) -> Vec<TaskCommand> {
    let Some(resource) = task.resource_mut(&change.resource) else {
        warn!(task = %task.id, resource = %change.resource, "status report for unknown resource");
        return Vec::new();
    };

    if change.status <= resource.known_status {
        debug!(
            resource = %change.resource,
            known = %resource.known_status,
            reported = %change.status,
            "redundant resource status; ignoring"
        );
        return Vec::new();
    }

    let mut commands = Vec::new();
    match change.error {
        None => {
            resource.known_status = change.status;
            info!(
                task = %task.id,
                resource = %change.resource,
                status = %change.status,
                "resource known status advanced"
            );
            emit_task_status(task, &mut commands);
        }
        Some(err) => {
            resource.applying_error = Some(err.clone());
            let kind = resource.kind();
            error!(
                task = %task.id,
                resource = %change.resource,
                target = %change.status,
                error = %err,
                "resource transition failed"
            );
            if change.status == ResourceStatus::STEADY {
                task.stop(format!("{} resource {} failed: {}", kind, change.resource, err));
            }
        }
    }
    commands
}

/// Record a managed agent status change and emit it when it differs.
pub fn handle_managed_agent_change(task: &mut Task, change: ManagedAgentChange) -> Vec<TaskCommand> {
    let task_id = task.id.clone();
    let Some(container) = task.container_mut(&change.container) else {
        warn!(task = %task_id, container = %change.container, "managed agent report for unknown container");
        return Vec::new();
    };

    if container.managed_agents.get(&change.agent) == Some(&change.status) {
        debug!(task = %task_id, agent = %change.agent, "redundant managed agent status; ignoring");
        return Vec::new();
    }

    container
        .managed_agents
        .insert(change.agent.clone(), change.status.clone());
    vec![TaskCommand::Emit(StateChangeEvent::ManagedAgent(
        ManagedAgentStateChange {
            task_id,
            container: change.container,
            agent: change.agent,
            status: change.status,
            reason: change.reason,
        },
    ))]
}

/// Recompute the task's status and queue a task event if it advanced.
pub(crate) fn emit_task_status(task: &mut Task, commands: &mut Vec<TaskCommand>) {
    if task.update_status().is_some() {
        if let Some(event) = task_state_change(task) {
            commands.push(TaskCommand::Emit(event));
        }
    }
}
