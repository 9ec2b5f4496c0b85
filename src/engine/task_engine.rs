// src/engine/task_engine.rs

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::credentials::CredentialsManager;
use crate::dependency::validate_task_spec;
use crate::driver::RuntimeDriver;
use crate::emitter::StateChangeEvent;
use crate::errors::{AgentError, Result};
use crate::resources::ResourceFactory;
use crate::sequencer::StopSequencer;
use crate::task::{Task, TaskId, TaskSpec};

use super::core::TaskCore;
use super::registry::TaskRegistry;
use super::runtime::{ManagedTask, TaskServices};
use super::{ContainerChange, ContainerEvent, DesiredStatusChange, EngineSettings, HostEvent};

/// Collaborators needed to build a [`TaskEngine`].
#[derive(Debug)]
pub struct EngineParts {
    pub driver: Arc<dyn RuntimeDriver>,
    pub credentials: Arc<dyn CredentialsManager>,
    pub resources: ResourceFactory,
    pub settings: EngineSettings,
    pub events: mpsc::Sender<StateChangeEvent>,
}

/// Host-wide facade: creates managed tasks from pushes and routes
/// control-plane changes and runtime events to them.
#[derive(Debug)]
pub struct TaskEngine {
    services: Arc<TaskServices>,
    resources: ResourceFactory,
    root: CancellationToken,
}

impl TaskEngine {
    pub fn new(parts: EngineParts) -> Self {
        let services = TaskServices {
            driver: parts.driver,
            credentials: parts.credentials,
            sequencer: Arc::new(StopSequencer::new()),
            registry: Arc::new(TaskRegistry::new()),
            settings: parts.settings,
            events: parts.events,
        };
        Self {
            services: Arc::new(services),
            resources: parts.resources,
            root: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.services.registry
    }

    pub fn sequencer(&self) -> &Arc<StopSequencer> {
        &self.services.sequencer
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.services.settings
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.services.registry.ids()
    }

    /// Apply a control-plane push.
    ///
    /// Credentials carried by the push are stored first. A push for a task
    /// that is already managed becomes a desired-status change; otherwise the
    /// task is validated, its resources built, and a new loop started.
    pub async fn apply_task(&self, spec: TaskSpec) -> Result<()> {
        for credentials in &spec.credentials {
            self.services.credentials.set(credentials.clone());
        }

        let change = DesiredStatusChange {
            desired: spec.desired_status,
            stop_sequence: spec.stop_sequence,
        };
        if self.services.registry.contains(&spec.id) {
            debug!(task = %spec.id, desired = %change.desired, "task already managed; forwarding push");
            return self.set_desired_status(&spec.id, change).await;
        }

        validate_task_spec(&spec)?;
        let resources = self.resources.build(&spec.id, &spec.resources);
        let task = Task::new(&spec, resources);
        let core = TaskCore::new(task, self.services.settings.image_pull_behavior)
            .with_initial_push(change);
        self.start(core)
    }

    /// Resume management of a task rebuilt from saved state.
    pub fn restore_task(&self, task: Task) -> Result<()> {
        info!(task = %task.id, known = %task.known_status, desired = %task.desired_status, "restoring task");
        self.start(TaskCore::new(task, self.services.settings.image_pull_behavior))
    }

    fn start(&self, core: TaskCore) -> Result<()> {
        let id = core.task().id.clone();
        match ManagedTask::spawn(core, Arc::clone(&self.services), self.root.child_token()) {
            Some(_) => {
                info!(task = %id, "started managed task");
                Ok(())
            }
            None => Err(AgentError::TaskAlreadyManaged(id)),
        }
    }

    pub async fn set_desired_status(&self, task_id: &str, change: DesiredStatusChange) -> Result<()> {
        let handle = self
            .services
            .registry
            .get(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
        handle
            .control
            .send(change)
            .await
            .map_err(|_| AgentError::TaskClosed(task_id.to_string()))
    }

    /// Route a runtime event to its task.
    pub async fn report(&self, event: HostEvent) -> Result<()> {
        let handle = self
            .services
            .registry
            .get(&event.task_id)
            .ok_or_else(|| AgentError::TaskNotFound(event.task_id.clone()))?;
        handle
            .containers
            .send(event.event)
            .await
            .map_err(|_| AgentError::TaskClosed(event.task_id))
    }

    pub async fn report_container_change(&self, task_id: &str, change: ContainerChange) -> Result<()> {
        self.report(HostEvent {
            task_id: task_id.to_string(),
            event: ContainerEvent::Status(change),
        })
        .await
    }

    /// Push `Stopped` to every managed task, in task-id order, assigning
    /// stop sequences from `first_sequence` upwards. Returns the next unused
    /// sequence number.
    pub async fn stop_all(&self, first_sequence: u64) -> u64 {
        let mut sequence = first_sequence;
        for id in self.task_ids() {
            match self
                .set_desired_status(&id, DesiredStatusChange::stop(sequence))
                .await
            {
                Ok(()) => sequence += 1,
                Err(err) => debug!(task = %id, error = %err, "could not stop task"),
            }
        }
        sequence
    }

    /// Resolve once every managed task has been cleaned up.
    pub async fn wait_until_idle(&self) {
        self.services.registry.wait_until_empty().await;
    }

    /// Cancel every task loop and every in-flight action.
    pub fn shutdown(&self) {
        info!(tasks = self.services.registry.len(), "shutting down task engine");
        self.root.cancel();
    }
}
