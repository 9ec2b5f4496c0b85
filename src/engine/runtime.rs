// src/engine/runtime.rs

//! Async shell around [`TaskCore`]: one `ManagedTask` per task.
//!
//! The loop is the only place the task is mutated. It blocks only on its
//! inbound channels and on explicit timers; every runtime or resource action
//! runs on its own spawned future and reports back through the task's own
//! channels.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialsManager;
use crate::driver::{ContainerSnapshot, RuntimeDriver, TransitionRequest};
use crate::emitter::{EventEmitter, StateChangeEvent};
use crate::resources::TaskResource;
use crate::sequencer::StopSequencer;
use crate::status::{ResourceStatus, TaskStatus};
use crate::task::{SentStatus, Task, TaskId};

use super::core::TaskCore;
use super::progress::ProgressOutcome;
use super::registry::{TaskHandle, TaskRegistry};
use super::{
    ContainerChange, ContainerEvent, DesiredStatusChange, EngineSettings, ResourceChange,
    TaskCommand, TaskEvent, jittered,
};

/// Host-wide collaborators shared by every managed task.
#[derive(Debug)]
pub struct TaskServices {
    pub driver: Arc<dyn RuntimeDriver>,
    pub credentials: Arc<dyn CredentialsManager>,
    pub sequencer: Arc<StopSequencer>,
    pub registry: Arc<TaskRegistry>,
    pub settings: EngineSettings,
    pub events: mpsc::Sender<StateChangeEvent>,
}

struct TaskInbox {
    control: mpsc::Receiver<DesiredStatusChange>,
    containers: mpsc::Receiver<ContainerEvent>,
    resources: mpsc::Receiver<ResourceChange>,
}

/// Result of waiting for "the next thing" in the loop.
enum Wait<T> {
    /// An inbound event was handled.
    Event,
    /// The caller's stop future resolved first.
    Done(T),
    Cancelled,
}

pub struct ManagedTask {
    core: TaskCore,
    inbox: TaskInbox,
    container_tx: mpsc::Sender<ContainerEvent>,
    resource_tx: mpsc::Sender<ResourceChange>,
    services: Arc<TaskServices>,
    emitter: EventEmitter,
    token: CancellationToken,
}

impl fmt::Debug for ManagedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTask")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ManagedTask {
    /// Register `core`'s task and start its loop.
    ///
    /// Returns `None` if a task with the same id is already registered.
    pub fn spawn(
        core: TaskCore,
        services: Arc<TaskServices>,
        token: CancellationToken,
    ) -> Option<TaskHandle> {
        let capacity = services.settings.channel_capacity.max(1);
        let (control_tx, control) = mpsc::channel(capacity);
        let (container_tx, containers) = mpsc::channel(capacity);
        let (resource_tx, resources) = mpsc::channel(capacity);

        let id = core.task().id.clone();
        let handle = TaskHandle {
            control: control_tx,
            containers: container_tx.clone(),
            token: token.clone(),
        };
        if !services.registry.insert(id.clone(), handle.clone()) {
            warn!(task = %id, "task already registered; not starting another loop");
            return None;
        }

        let emitter = EventEmitter::spawn(id, services.events.clone(), token.clone());
        let managed = ManagedTask {
            core,
            inbox: TaskInbox {
                control,
                containers,
                resources,
            },
            container_tx,
            resource_tx,
            services,
            emitter,
            token,
        };
        tokio::spawn(managed.run());
        Some(handle)
    }

    fn id(&self) -> &str {
        &self.core.task().id
    }

    /// Main loop.
    ///
    /// 1. Initial status propagation and re-emission of unacknowledged events.
    /// 2. Wait for earlier-sequenced tasks to release host resources.
    /// 3. Idle while steady; progress while not steady and not terminal.
    /// 4. Cleanup once the task is known stopped.
    pub async fn run(mut self) {
        info!(task = %self.id(), "managing task");
        let commands = self.core.initialize();
        self.execute(commands);

        let terminal = self.wait_for_host_resources().await && self.drive_to_terminal().await;
        if terminal {
            self.cleanup().await;
        } else {
            info!(task = %self.id(), "task scope cancelled; exiting without cleanup");
            self.services.registry.remove(&self.core.task().id);
        }
    }

    /// Returns `false` if the task's scope was cancelled.
    async fn drive_to_terminal(&mut self) -> bool {
        loop {
            while self.core.is_steady() {
                if !self.wait_steady().await {
                    return false;
                }
            }
            if self.core.known_status().is_terminal() {
                return true;
            }
            if !self.progress_task().await {
                return false;
            }
            if self.core.known_status().is_terminal() {
                return true;
            }
        }
    }

    async fn wait_for_host_resources(&mut self) -> bool {
        let seq = self.core.task().start_sequence;
        if seq == 0 {
            return true;
        }
        if self.core.desired_status().is_terminal() {
            info!(task = %self.id(), "task desired stopped; not waiting for host resources");
            return true;
        }

        info!(task = %self.id(), start_sequence = seq, "waiting for earlier tasks to release host resources");
        let services = Arc::clone(&self.services);
        let released = services.sequencer.wait(seq);
        tokio::pin!(released);
        loop {
            match self.wait_event(&mut released).await {
                Wait::Done(()) => {
                    info!(task = %self.id(), start_sequence = seq, "host resources released");
                    return true;
                }
                Wait::Cancelled => return false,
                Wait::Event => {
                    if self.core.desired_status().is_terminal() {
                        info!(task = %self.id(), "task stopped while waiting for host resources");
                        return true;
                    }
                }
            }
        }
    }

    /// Idle until an event or the jittered poll interval. A timeout triggers
    /// a read-only verification of running containers.
    async fn wait_steady(&mut self) -> bool {
        let settings = &self.services.settings;
        let timeout = jittered(
            settings.steady_state_poll_interval,
            settings.steady_state_poll_jitter,
        );
        match self.wait_event(tokio::time::sleep(timeout)).await {
            Wait::Cancelled => false,
            Wait::Event => true,
            Wait::Done(()) => {
                debug!(task = %self.id(), "steady state poll; verifying containers");
                self.spawn_verification();
                true
            }
        }
    }

    async fn progress_task(&mut self) -> bool {
        let step = self.core.progress(self.services.credentials.as_ref());
        self.execute(step.commands);

        let poll = self.services.settings.dependency_poll_interval;
        let credentials_wait = self.services.settings.credentials_wait_timeout;
        let waited = match step.outcome {
            ProgressOutcome::TransitionsStarted => {
                self.wait_event(std::future::pending::<()>()).await
            }
            ProgressOutcome::BlockedOnOrdering => {
                self.wait_event(tokio::time::sleep(poll)).await
            }
            ProgressOutcome::WaitingForCredentials => {
                info!(task = %self.id(), timeout = ?credentials_wait, "waiting for credentials");
                let waited = self.wait_event(tokio::time::sleep(credentials_wait)).await;
                if let Wait::Done(()) = waited {
                    warn!(task = %self.id(), "timed out waiting for credentials");
                    let commands = self.core.handle_unable_to_transition();
                    self.execute(commands);
                }
                waited
            }
            ProgressOutcome::Stuck => Wait::Event,
        };
        !matches!(waited, Wait::Cancelled) && !self.token.is_cancelled()
    }

    /// Wait for one inbound event (handling it) or for `stop` to resolve.
    async fn wait_event<F: Future>(&mut self, stop: F) -> Wait<F::Output> {
        tokio::pin!(stop);
        let event = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Wait::Cancelled,
            Some(change) = self.inbox.control.recv() => TaskEvent::DesiredStatus(change),
            Some(event) = self.inbox.containers.recv() => TaskEvent::Container(event),
            Some(change) = self.inbox.resources.recv() => TaskEvent::Resource(change),
            output = &mut stop => return Wait::Done(output),
            else => return Wait::Cancelled,
        };
        self.handle_event(event);
        Wait::Event
    }

    fn handle_event(&mut self, event: TaskEvent) {
        debug!(task = %self.id(), ?event, "task received event");
        let commands = self.core.step(event);
        self.execute(commands);
    }

    /// Execute core commands. Never blocks.
    fn execute(&self, commands: Vec<TaskCommand>) {
        for command in commands {
            match command {
                TaskCommand::TransitionContainer(request) => self.dispatch_container(request),
                TaskCommand::TransitionResource {
                    resource,
                    handler,
                    target,
                } => self.dispatch_resource(resource, handler, target),
                TaskCommand::PostContainerStatus { container, status } => {
                    self.post_container(ContainerEvent::Status(ContainerChange::new(
                        container, status,
                    )));
                }
                TaskCommand::PostResourceStatus { resource, status } => {
                    self.post_resource(ResourceChange::new(resource, status));
                }
                TaskCommand::Emit(event) => self.emitter.emit(event),
                TaskCommand::RegisterStopSequence(seq) => self.services.sequencer.add(seq, 1),
            }
        }
    }

    fn dispatch_container(&self, request: TransitionRequest) {
        info!(
            task = %self.id(),
            container = %request.container.name,
            target = %request.target,
            "dispatching container transition"
        );
        let driver = Arc::clone(&self.services.driver);
        let tx = self.container_tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let name = request.container.name.clone();
            let report = tokio::select! {
                _ = token.cancelled() => return,
                report = driver.transition(request) => report,
            };
            let event = ContainerEvent::Status(ContainerChange::from_report(name, report));
            send_or_cancel(&tx, event, &token).await;
        });
    }

    fn dispatch_resource(
        &self,
        resource: String,
        handler: Arc<dyn TaskResource>,
        target: ResourceStatus,
    ) {
        info!(task = %self.id(), %resource, %target, "dispatching resource transition");
        let tx = self.resource_tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = handler.apply_transition(target) => result,
            };
            let change = ResourceChange {
                resource,
                status: target,
                error: result.err().map(|e| e.to_string()),
            };
            send_or_cancel(&tx, change, &token).await;
        });
    }

    fn post_container(&self, event: ContainerEvent) {
        let tx = self.container_tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move { send_or_cancel(&tx, event, &token).await });
    }

    fn post_resource(&self, change: ResourceChange) {
        let tx = self.resource_tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move { send_or_cancel(&tx, change, &token).await });
    }

    fn spawn_verification(&self) {
        let task = self.core.task();
        let snapshots: Vec<ContainerSnapshot> = task
            .containers
            .iter()
            .filter(|c| c.known_status.is_running())
            .map(|c| ContainerSnapshot::of(&task.id, c))
            .collect();
        if snapshots.is_empty() {
            return;
        }
        let driver = Arc::clone(&self.services.driver);
        let tx = self.container_tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let changes = tokio::select! {
                _ = token.cancelled() => return,
                changes = driver.verify(snapshots) => changes,
            };
            for change in changes {
                send_or_cancel(&tx, ContainerEvent::Status(change), &token).await;
            }
        });
    }

    /// Cleanup once the task is known stopped.
    ///
    /// Releases credentials, the stop sequence and addressing right away,
    /// then waits out the grace period and the stopped acknowledgement
    /// before sweeping. Inbound events keep being serviced throughout.
    async fn cleanup(mut self) {
        let task = self.core.task();
        info!(
            task = %task.id,
            reason = ?task.terminal_reason,
            "task stopped; cleaning up"
        );

        self.release_credentials();
        let stop_sequence = self.core.task().stop_sequence;
        if stop_sequence != 0 {
            self.services.sequencer.done(stop_sequence);
        }
        self.spawn_release_addressing();

        let reported = self.wait_cleanup_grace().await && self.wait_stopped_reported().await;
        self.finish(reported).await;
    }

    /// Only the execution credentials belong to this task. Pull credentials
    /// are host-wide and may be shared with other tasks under the same id.
    fn release_credentials(&self) {
        if let Some(id) = &self.core.task().execution_credentials_id {
            debug!(task = %self.id(), credentials = %id, "releasing execution credentials");
            self.services.credentials.remove(id);
        }
    }

    fn spawn_release_addressing(&self) {
        let driver = Arc::clone(&self.services.driver);
        let task_id: TaskId = self.core.task().id.clone();
        tokio::spawn(async move { driver.release_addressing(task_id).await });
    }

    async fn wait_cleanup_grace(&mut self) -> bool {
        let settings = &self.services.settings;
        let grace = jittered(settings.task_cleanup_wait, settings.task_cleanup_jitter);
        let Some(deadline) = self.core.task().known_status_changed_at.checked_add(grace) else {
            warn!(task = %self.id(), ?grace, "cleanup grace period never ends; holding task until cancelled");
            loop {
                if let Wait::Cancelled = self.wait_event(std::future::pending::<()>()).await {
                    return false;
                }
            }
        };
        let now = Instant::now();
        if now >= deadline {
            debug!(task = %self.id(), "cleanup grace period already elapsed");
            return true;
        }

        info!(task = %self.id(), remaining = ?(deadline - now), "waiting before sweeping task");
        let deadline = tokio::time::Instant::from_std(deadline);
        loop {
            match self.wait_event(tokio::time::sleep_until(deadline)).await {
                Wait::Done(()) => return true,
                Wait::Cancelled => return false,
                Wait::Event => {}
            }
        }
    }

    async fn wait_stopped_reported(&mut self) -> bool {
        let settings = &self.services.settings;
        let acked = wait_for_stopped_ack(
            self.core.task().id.clone(),
            Arc::clone(&self.core.task().sent),
            settings.stopped_report_interval,
            settings.stopped_report_max_attempts,
        );
        tokio::pin!(acked);
        loop {
            match self.wait_event(&mut acked).await {
                Wait::Done(acked) => return acked,
                Wait::Cancelled => return false,
                Wait::Event => {}
            }
        }
    }

    async fn finish(self, reported: bool) {
        let ManagedTask {
            core,
            inbox,
            services,
            token,
            ..
        } = self;
        let task = core.into_task();

        tokio::spawn(discard_events(task.id.clone(), inbox, token.clone()));

        if reported {
            sweep(&task, services.driver.as_ref()).await;
        } else if !token.is_cancelled() {
            error!(
                task = %task.id,
                "stopped status was never acknowledged; abandoning sweep"
            );
        }

        services.registry.remove(&task.id);
        token.cancel();
        info!(task = %task.id, "task cleanup finished");
    }
}

async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, value: T, token: &CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        res = tx.send(value) => {
            if res.is_err() {
                debug!("task inbox closed; dropping message");
            }
        }
    }
}

async fn wait_for_stopped_ack(
    task_id: TaskId,
    sent: Arc<SentStatus<TaskStatus>>,
    interval: Duration,
    attempts: u32,
) -> bool {
    for attempt in 1..=attempts {
        if sent.get() >= TaskStatus::Stopped {
            return true;
        }
        debug!(task = %task_id, attempt, "waiting for stopped status to be acknowledged");
        tokio::time::sleep(interval).await;
    }
    sent.get() >= TaskStatus::Stopped
}

/// Drain the inbox until the task scope is cancelled.
async fn discard_events(task_id: TaskId, mut inbox: TaskInbox, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some(change) = inbox.control.recv() => {
                debug!(task = %task_id, ?change, "discarding desired status change");
            }
            Some(event) = inbox.containers.recv() => {
                debug!(task = %task_id, ?event, "discarding container event");
            }
            Some(change) = inbox.resources.recv() => {
                debug!(task = %task_id, ?change, "discarding resource event");
            }
            else => break,
        }
    }
}

/// Remove every container the runtime knows about and clean up every
/// resource.
async fn sweep(task: &Task, driver: &dyn RuntimeDriver) {
    for container in &task.containers {
        if container.runtime_id.is_none() {
            continue;
        }
        let snapshot = ContainerSnapshot::of(&task.id, container);
        if let Err(err) = driver.remove_container(snapshot).await {
            warn!(task = %task.id, container = %container.name(), error = %err, "failed to remove container");
        }
    }
    for resource in &task.resources {
        if let Err(err) = resource.handler.cleanup().await {
            warn!(task = %task.id, resource = %resource.name, error = %err, "failed to clean up resource");
        }
    }
    info!(task = %task.id, "task swept");
}
