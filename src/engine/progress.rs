// src/engine/progress.rs

//! One planning pass over a task.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::credentials::CredentialsManager;
use crate::driver::TransitionRequest;
use crate::emitter::task_state_change;
use crate::planner::{PlanReason, plan_container, plan_resource};
use crate::status::TaskStatus;
use crate::task::Task;

use super::TaskCommand;

/// What the shell should wait for after a planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Something moved (or is already in flight); wait for the next event.
    TransitionsStarted,
    /// Nothing can move until an ordering dependency resolves; poll.
    BlockedOnOrdering,
    /// Nothing can move, but credentials may still arrive; wait bounded.
    WaitingForCredentials,
    /// Nothing can move and nothing is pending; the task has been escalated.
    Stuck,
}

#[derive(Debug)]
pub struct ProgressStep {
    pub commands: Vec<TaskCommand>,
    pub outcome: ProgressOutcome,
}

/// Plan every resource, then every container, and turn the plans into
/// commands.
///
/// An action is only dispatched after winning the entity's applied-status
/// claim. Bookkeeping bumps are posted back through the entity's own event
/// path.
pub fn progress_task(task: &mut Task, credentials: &dyn CredentialsManager) -> ProgressStep {
    let mut commands = Vec::new();
    let mut any_transition = false;
    let mut blocked = Vec::new();
    let mut waiting_for_credentials = false;

    for resource in &task.resources {
        let plan = plan_resource(task, resource);
        let Some(next) = plan.next_status else {
            if let Some(edge) = &plan.blocked_on {
                blocked.push(format!("{} -> {}", resource.name, edge));
            }
            continue;
        };
        any_transition = true;

        if !plan.action_required {
            commands.push(TaskCommand::PostResourceStatus {
                resource: resource.name.clone(),
                status: next,
            });
            continue;
        }
        if !resource.applied.try_claim(next) {
            debug!(task = %task.id, resource = %resource.name, target = %next, "resource transition already in flight");
            continue;
        }
        commands.push(TaskCommand::TransitionResource {
            resource: resource.name.clone(),
            handler: Arc::clone(&resource.handler),
            target: next,
        });
    }

    for container in &task.containers {
        let plan = plan_container(task, container, credentials);
        let Some(next) = plan.next_status else {
            if let Some(edge) = &plan.blocked_on {
                blocked.push(format!("{} -> {}", container.name(), edge));
            }
            match &plan.reason {
                Some(PlanReason::CredentialsNotResolved(id)) => {
                    debug!(task = %task.id, container = %container.name(), credentials = %id, "waiting for credentials");
                    waiting_for_credentials = true;
                }
                Some(PlanReason::Unresolvable(why)) => {
                    warn!(task = %task.id, container = %container.name(), %why, "container cannot progress");
                }
                Some(PlanReason::ShutdownOrder(dependent)) => {
                    debug!(task = %task.id, container = %container.name(), %dependent, "waiting for dependent to stop");
                }
                _ => {}
            }
            continue;
        };
        any_transition = true;

        if !plan.action_required {
            commands.push(TaskCommand::PostContainerStatus {
                container: container.name().to_string(),
                status: next,
            });
            continue;
        }
        if !container.applied.try_claim(next) {
            debug!(task = %task.id, container = %container.name(), target = %next, "container transition already in flight");
            continue;
        }
        commands.push(TaskCommand::TransitionContainer(TransitionRequest::new(
            &task.id, container, next,
        )));
    }

    let outcome = if any_transition {
        ProgressOutcome::TransitionsStarted
    } else if !blocked.is_empty() {
        debug!(task = %task.id, ?blocked, "blocked on ordering dependencies");
        ProgressOutcome::BlockedOnOrdering
    } else if waiting_for_credentials {
        ProgressOutcome::WaitingForCredentials
    } else {
        commands.extend(handle_unable_to_transition(task));
        ProgressOutcome::Stuck
    };

    ProgressStep { commands, outcome }
}

/// Escalate a task that is not steady but cannot move.
///
/// A task not yet desired stopped is told to stop. A task already desired
/// stopped is marked stopped outright so cleanup can run.
pub fn handle_unable_to_transition(task: &mut Task) -> Vec<TaskCommand> {
    let mut commands = Vec::new();
    if task.desired_status.is_terminal() {
        error!(
            task = %task.id,
            known = %task.known_status,
            "task cannot reach stopped; forcing known status to stopped"
        );
        task.set_terminal_reason("Task could not complete its transition to stopped");
        if task.known_status < TaskStatus::Stopped {
            task.known_status = TaskStatus::Stopped;
            task.known_status_changed_at = Instant::now();
            if let Some(event) = task_state_change(task) {
                commands.push(TaskCommand::Emit(event));
            }
        }
    } else {
        error!(
            task = %task.id,
            known = %task.known_status,
            desired = %task.desired_status,
            "task is not steady but no container can transition; stopping task"
        );
        task.stop("Task could not make progress towards its desired status");
    }
    commands
}
