// src/emitter.rs

//! Outbound state-change events.
//!
//! Events are built from a task snapshot right after a status advance and
//! handed to a per-task forwarder that delivers them, in order, to the
//! downstream consumer's bounded channel. A full channel holds the
//! forwarder until the consumer catches up or the task's scope is cancelled.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::status::{ContainerStatus, TaskStatus};
use crate::task::{Container, SentStatus, Task, TaskId};

#[derive(Debug, Clone)]
pub struct TaskStateChange {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub reason: Option<String>,
    sent: Arc<SentStatus<TaskStatus>>,
}

impl TaskStateChange {
    /// Mark this status as delivered upstream.
    pub fn acknowledge(&self) {
        self.sent.record(self.status);
    }
}

#[derive(Debug, Clone)]
pub struct ContainerStateChange {
    pub task_id: TaskId,
    pub container: String,
    pub runtime_id: Option<String>,
    pub status: ContainerStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    sent: Arc<SentStatus<ContainerStatus>>,
}

impl ContainerStateChange {
    pub fn acknowledge(&self) {
        self.sent.record(self.status);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedAgentStateChange {
    pub task_id: TaskId,
    pub container: String,
    pub agent: String,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StateChangeEvent {
    Task(TaskStateChange),
    Container(ContainerStateChange),
    ManagedAgent(ManagedAgentStateChange),
}

impl StateChangeEvent {
    pub fn task_id(&self) -> &str {
        match self {
            StateChangeEvent::Task(e) => &e.task_id,
            StateChangeEvent::Container(e) => &e.task_id,
            StateChangeEvent::ManagedAgent(e) => &e.task_id,
        }
    }

    /// Acknowledge delivery. Managed agent events carry no acknowledgement.
    pub fn acknowledge(&self) {
        match self {
            StateChangeEvent::Task(e) => e.acknowledge(),
            StateChangeEvent::Container(e) => e.acknowledge(),
            StateChangeEvent::ManagedAgent(_) => {}
        }
    }
}

/// Event for the task's current known status, if it is reportable and has
/// not been acknowledged yet.
pub fn task_state_change(task: &Task) -> Option<StateChangeEvent> {
    let status = task.known_status;
    if !status.is_reportable() || task.sent.get() >= status {
        return None;
    }
    let reason = if status.is_terminal() {
        task.terminal_reason.clone()
    } else {
        None
    };
    Some(StateChangeEvent::Task(TaskStateChange {
        task_id: task.id.clone(),
        status,
        reason,
        sent: Arc::clone(&task.sent),
    }))
}

/// Event for a container's current known status, if it is reportable and
/// has not been acknowledged yet.
pub fn container_state_change(task_id: &str, container: &Container) -> Option<StateChangeEvent> {
    let status = container.known_status;
    if !status.is_reportable() || container.sent.get() >= status {
        return None;
    }
    Some(StateChangeEvent::Container(ContainerStateChange {
        task_id: task_id.to_string(),
        container: container.name().to_string(),
        runtime_id: container.runtime_id.clone(),
        status,
        exit_code: container.exit_code,
        reason: container.applying_error.clone(),
        sent: Arc::clone(&container.sent),
    }))
}

/// Ordered, non-blocking event sink for one task.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    queue: mpsc::UnboundedSender<StateChangeEvent>,
}

impl EventEmitter {
    /// Start the forwarder for `task_id`. It stops when `token` is cancelled
    /// or the consumer goes away.
    pub fn spawn(
        task_id: TaskId,
        outbound: mpsc::Sender<StateChangeEvent>,
        token: CancellationToken,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(task_id, rx, outbound, token));
        Self { queue }
    }

    pub fn emit(&self, event: StateChangeEvent) {
        if self.queue.send(event).is_err() {
            debug!("event forwarder stopped; dropping event");
        }
    }
}

async fn forward(
    task_id: TaskId,
    mut rx: mpsc::UnboundedReceiver<StateChangeEvent>,
    outbound: mpsc::Sender<StateChangeEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tokio::select! {
            _ = token.cancelled() => break,
            res = outbound.send(event) => {
                if res.is_err() {
                    warn!(task = %task_id, "event consumer is gone; stopping forwarder");
                    break;
                }
            }
        }
    }
    debug!(task = %task_id, "event forwarder exiting");
}
