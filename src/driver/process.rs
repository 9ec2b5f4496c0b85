// src/driver/process.rs

//! Runtime driver that runs each container's command as a host process.
//!
//! - `Created` validates the command and reserves host ports.
//! - `Running` spawns `sh -c <command>`, moves it into the task cgroup when
//!   one exists, and leaves a waiter that reports natural exits as
//!   runtime-observed `Stopped` events.
//! - `Stopped` kills the process and waits (bounded) for it to exit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{ContainerChange, ContainerEvent, HostEvent};
use crate::fs::FileSystem;
use crate::status::ContainerStatus;
use crate::task::TaskId;

use super::ports::PortAllocator;
use super::stdout::spawn_output_monitors;
use super::{
    ContainerSnapshot, DriverError, DriverErrorKind, DriverFuture, RuntimeDriver, StatusReport,
    TransitionRequest,
};

type EntryKey = (TaskId, String);
type StopReply = oneshot::Sender<Option<i32>>;

#[derive(Debug)]
enum ProcessState {
    Created,
    Running(oneshot::Sender<StopReply>),
    Exited(Option<i32>),
}

#[derive(Debug)]
struct ProcessEntry {
    runtime_id: String,
    ports: Vec<u16>,
    state: ProcessState,
}

type Entries = Arc<Mutex<HashMap<EntryKey, ProcessEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<EntryKey, ProcessEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where task cgroups live. A task's processes join `<root>/<task>` when
/// that directory exists.
#[derive(Debug)]
struct CgroupPlacement {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

#[derive(Debug)]
pub struct ProcessDriver {
    host_events: mpsc::Sender<HostEvent>,
    ports: PortAllocator,
    stop_timeout: Duration,
    next_id: AtomicU64,
    entries: Entries,
    cgroups: Option<CgroupPlacement>,
}

impl ProcessDriver {
    pub fn new(
        host_events: mpsc::Sender<HostEvent>,
        ports: PortAllocator,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            host_events,
            ports,
            stop_timeout,
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
            cgroups: None,
        }
    }

    /// Place started processes into their task's cgroup under `root`.
    pub fn with_cgroups(mut self, fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        self.cgroups = Some(CgroupPlacement {
            fs,
            root: root.into(),
        });
        self
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    fn key(container: &ContainerSnapshot) -> EntryKey {
        (container.task_id.clone(), container.name.clone())
    }

    fn join_cgroup(&self, container: &ContainerSnapshot, child: &Child) -> anyhow::Result<()> {
        let Some(cgroups) = &self.cgroups else {
            return Ok(());
        };
        let dir = cgroups.root.join(&container.task_id);
        if !cgroups.fs.is_dir(&dir) {
            return Ok(());
        }
        let pid = child.id().context("container process exited before joining its cgroup")?;
        cgroups
            .fs
            .write(&dir.join("cgroup.procs"), pid.to_string().as_bytes())?;
        debug!(task = %container.task_id, container = %container.name, pid, cgroup = ?dir, "process joined task cgroup");
        Ok(())
    }

    fn create(&self, container: &ContainerSnapshot) -> StatusReport {
        if container.command.trim().is_empty() {
            return StatusReport::failed(
                ContainerStatus::Created,
                DriverError::new(
                    DriverErrorKind::ImagePull,
                    format!("container {} has no command to run", container.name),
                ),
            );
        }

        let key = Self::key(container);
        if let Some(entry) = lock(&self.entries).get(&key) {
            debug!(task = %key.0, container = %key.1, "container already created");
            return StatusReport::ok(ContainerStatus::Created).with_runtime_id(&entry.runtime_id);
        }

        let ports = match self.ports.allocate(container.ports) {
            Ok(ports) => ports,
            Err(err) => return StatusReport::failed(ContainerStatus::Created, err),
        };
        let runtime_id = format!("proc-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(task = %key.0, container = %key.1, %runtime_id, ?ports, "created container");
        lock(&self.entries).insert(
            key,
            ProcessEntry {
                runtime_id: runtime_id.clone(),
                ports,
                state: ProcessState::Created,
            },
        );
        StatusReport::ok(ContainerStatus::Created).with_runtime_id(runtime_id)
    }

    fn start(&self, container: &ContainerSnapshot) -> StatusReport {
        let key = Self::key(container);
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(&key) else {
            return StatusReport::failed(
                ContainerStatus::Running,
                DriverError::new(
                    DriverErrorKind::NotFound,
                    format!("container {} was never created", container.name),
                ),
            );
        };
        let runtime_id = entry.runtime_id.clone();
        match entry.state {
            ProcessState::Running(_) => {
                return StatusReport::ok(ContainerStatus::Running).with_runtime_id(runtime_id);
            }
            ProcessState::Exited(code) => {
                return StatusReport::ok(ContainerStatus::Stopped)
                    .with_runtime_id(runtime_id)
                    .with_exit_code(code);
            }
            ProcessState::Created => {}
        }

        let mut child = match build_command(container, &entry.ports).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(task = %key.0, container = %key.1, error = %e, "failed to spawn container process");
                return StatusReport::failed(
                    ContainerStatus::Running,
                    DriverError::new(
                        DriverErrorKind::Other,
                        format!("spawning process for container {}: {e}", container.name),
                    ),
                );
            }
        };

        if let Err(e) = self.join_cgroup(container, &child) {
            // Dropping the child kills it.
            warn!(task = %key.0, container = %key.1, error = %e, "failed to place container process in task cgroup");
            return StatusReport::failed(
                ContainerStatus::Running,
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("placing container {} in its cgroup: {e:#}", container.name),
                ),
            );
        }

        spawn_output_monitors(
            key.0.clone(),
            key.1.clone(),
            child.stdout.take(),
            child.stderr.take(),
            container.healthy_on_stdout.as_deref(),
            self.host_events.clone(),
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        entry.state = ProcessState::Running(stop_tx);
        drop(entries);

        info!(task = %key.0, container = %key.1, %runtime_id, "started container process");
        tokio::spawn(wait_for_exit(
            key,
            child,
            stop_rx,
            Arc::clone(&self.entries),
            self.host_events.clone(),
        ));
        StatusReport::ok(ContainerStatus::Running).with_runtime_id(runtime_id)
    }

    async fn stop(&self, container: &ContainerSnapshot) -> StatusReport {
        let key = Self::key(container);
        let (runtime_id, stop) = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(&key) else {
                debug!(task = %key.0, container = %key.1, "stopping unknown container; nothing to do");
                return StatusReport::ok(ContainerStatus::Stopped);
            };
            let stop = match std::mem::replace(&mut entry.state, ProcessState::Exited(None)) {
                ProcessState::Running(stop) => Some(stop),
                ProcessState::Exited(code) => {
                    entry.state = ProcessState::Exited(code);
                    return StatusReport::ok(ContainerStatus::Stopped)
                        .with_runtime_id(&entry.runtime_id)
                        .with_exit_code(code);
                }
                ProcessState::Created => None,
            };
            (entry.runtime_id.clone(), stop)
        };

        let Some(stop) = stop else {
            debug!(task = %key.0, container = %key.1, "container never started; marking stopped");
            return StatusReport::ok(ContainerStatus::Stopped).with_runtime_id(runtime_id);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if stop.send(reply_tx).is_err() {
            // The waiter already finished and recorded the exit.
            let code = match lock(&self.entries).get(&key).map(|e| &e.state) {
                Some(ProcessState::Exited(code)) => *code,
                _ => None,
            };
            return StatusReport::ok(ContainerStatus::Stopped)
                .with_runtime_id(runtime_id)
                .with_exit_code(code);
        }

        match tokio::time::timeout(self.stop_timeout, reply_rx).await {
            Ok(Ok(code)) => {
                info!(task = %key.0, container = %key.1, ?code, "stopped container process");
                StatusReport::ok(ContainerStatus::Stopped)
                    .with_runtime_id(runtime_id)
                    .with_exit_code(code)
            }
            Ok(Err(_)) => StatusReport::ok(ContainerStatus::Stopped).with_runtime_id(runtime_id),
            Err(_) => StatusReport::failed(
                ContainerStatus::Stopped,
                DriverError::new(
                    DriverErrorKind::Timeout,
                    format!(
                        "container {} did not exit within {:?}",
                        container.name, self.stop_timeout
                    ),
                ),
            )
            .with_runtime_id(runtime_id),
        }
    }
}

fn build_command(container: &ContainerSnapshot, ports: &[u16]) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&container.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&container.command);
        c
    };

    cmd.envs(&container.env)
        .env("MANDELBOX_TASK", &container.task_id)
        .env("MANDELBOX_CONTAINER", &container.name);
    for (i, port) in ports.iter().enumerate() {
        cmd.env(format!("MANDELBOX_PORT_{i}"), port.to_string());
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Own the child until it exits on its own or a stop is requested.
///
/// Natural exits are reported as runtime-observed events; requested stops
/// answer the stopper instead, or fall back to an event when the stopper
/// has given up. Dropping the stop sender (container removed)
/// kills the process.
async fn wait_for_exit(
    key: EntryKey,
    mut child: Child,
    stop_rx: oneshot::Receiver<StopReply>,
    entries: Entries,
    host_events: mpsc::Sender<HostEvent>,
) {
    let (task_id, container) = key;
    tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(task = %task_id, %container, error = %e, "failed to wait for container process");
                    None
                }
            };
            info!(task = %task_id, %container, ?code, "container process exited");
            record_exit(&entries, &task_id, &container, code);
            report_exit(&host_events, task_id, container, code).await;
        }

        reply = stop_rx => {
            if let Err(e) = child.kill().await {
                warn!(task = %task_id, %container, error = %e, "failed to kill container process");
            }
            let code = child.wait().await.ok().and_then(|status| status.code());
            record_exit(&entries, &task_id, &container, code);
            match reply {
                Ok(reply) => {
                    if reply.send(code).is_err() {
                        // The stopper stopped waiting; the exit is still owed.
                        info!(task = %task_id, %container, ?code, "container process exited after stop timed out");
                        report_exit(&host_events, task_id, container, code).await;
                    }
                }
                Err(_) => debug!(task = %task_id, %container, "container removed; process killed"),
            }
        }
    }
}

async fn report_exit(
    host_events: &mpsc::Sender<HostEvent>,
    task_id: TaskId,
    container: String,
    code: Option<i32>,
) {
    let event = HostEvent {
        task_id: task_id.clone(),
        event: ContainerEvent::Status(
            ContainerChange::new(container.clone(), ContainerStatus::Stopped).with_exit_code(code),
        ),
    };
    if host_events.send(event).await.is_err() {
        debug!(task = %task_id, %container, "host event channel closed; exit not reported");
    }
}

fn record_exit(entries: &Entries, task_id: &str, container: &str, code: Option<i32>) {
    if let Some(entry) = lock(entries).get_mut(&(task_id.to_string(), container.to_string())) {
        entry.state = ProcessState::Exited(code);
    }
}

impl RuntimeDriver for ProcessDriver {
    fn transition(&self, request: TransitionRequest) -> DriverFuture<'_, StatusReport> {
        Box::pin(async move {
            let container = &request.container;
            debug!(task = %container.task_id, container = %container.name, target = %request.target, "process driver transition");
            match request.target {
                ContainerStatus::Created => self.create(container),
                ContainerStatus::Running => self.start(container),
                ContainerStatus::Stopped => self.stop(container).await,
                ContainerStatus::None => StatusReport::failed(
                    request.target,
                    DriverError::new(DriverErrorKind::Other, "cannot transition to NONE"),
                ),
            }
        })
    }

    fn verify(&self, containers: Vec<ContainerSnapshot>) -> DriverFuture<'_, Vec<ContainerChange>> {
        Box::pin(async move {
            let entries = lock(&self.entries);
            containers
                .into_iter()
                .filter_map(|container| match entries.get(&Self::key(&container)) {
                    None => Some(
                        ContainerChange::new(container.name.clone(), ContainerStatus::Stopped)
                            .with_error(DriverError::new(
                                DriverErrorKind::NotFound,
                                format!("container {} is not known to the runtime", container.name),
                            )),
                    ),
                    Some(ProcessEntry {
                        state: ProcessState::Exited(code),
                        ..
                    }) => Some(
                        ContainerChange::new(container.name.clone(), ContainerStatus::Stopped)
                            .with_exit_code(*code),
                    ),
                    Some(_) => None,
                })
                .collect()
        })
    }

    fn remove_container(
        &self,
        container: ContainerSnapshot,
    ) -> DriverFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            let removed = lock(&self.entries).remove(&Self::key(&container));
            match removed {
                Some(entry) => {
                    self.ports.release(&entry.ports);
                    info!(task = %container.task_id, container = %container.name, runtime_id = %entry.runtime_id, "removed container");
                }
                None => {
                    debug!(task = %container.task_id, container = %container.name, "container already removed");
                }
            }
            Ok(())
        })
    }

    fn release_addressing(&self, task_id: TaskId) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let mut entries = lock(&self.entries);
            for ((owner, _), entry) in entries.iter_mut() {
                if *owner == task_id {
                    self.ports.release(&std::mem::take(&mut entry.ports));
                }
            }
            debug!(task = %task_id, "released task addressing");
        })
    }
}
