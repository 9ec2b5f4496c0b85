use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use mandelhost::driver::{
    ContainerSnapshot, DriverError, DriverFuture, RuntimeDriver, StatusReport, TransitionRequest,
};
use mandelhost::engine::ContainerChange;
use mandelhost::status::ContainerStatus;
use mandelhost::task::TaskId;

/// How the fake answers one transition.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(DriverError),
    /// Hold the reply until the notify fires, then succeed.
    WaitFor(Arc<Notify>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransition {
    pub task_id: TaskId,
    pub container: String,
    pub target: ContainerStatus,
}

#[derive(Debug, Default)]
struct FakeState {
    scripts: HashMap<(String, ContainerStatus), VecDeque<Script>>,
    transitions: Vec<RecordedTransition>,
    removed: Vec<String>,
    released: Vec<TaskId>,
    verify_calls: usize,
    verify_changes: Vec<ContainerChange>,
}

/// A fake runtime driver that:
/// - records every transition request
/// - answers from per-(container, target) scripts, succeeding by default.
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Queue a reply for the next transition of `container` to `target`.
    pub fn script(&self, container: &str, target: ContainerStatus, script: Script) {
        self.lock()
            .scripts
            .entry((container.to_string(), target))
            .or_default()
            .push_back(script);
    }

    pub fn fail(&self, container: &str, target: ContainerStatus, error: DriverError) {
        self.script(container, target, Script::Fail(error));
    }

    /// Hold the next `target` transition of `container` until the returned
    /// notify fires.
    pub fn gate(&self, container: &str, target: ContainerStatus) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script(container, target, Script::WaitFor(Arc::clone(&gate)));
        gate
    }

    /// Changes the next `verify` call reports.
    pub fn set_verify_changes(&self, changes: Vec<ContainerChange>) {
        self.lock().verify_changes = changes;
    }

    pub fn transitions(&self) -> Vec<RecordedTransition> {
        self.lock().transitions.clone()
    }

    /// Targets requested for `container`, in order.
    pub fn targets_for(&self, container: &str) -> Vec<ContainerStatus> {
        self.lock()
            .transitions
            .iter()
            .filter(|t| t.container == container)
            .map(|t| t.target)
            .collect()
    }

    pub fn count(&self, container: &str, target: ContainerStatus) -> usize {
        self.targets_for(container)
            .into_iter()
            .filter(|t| *t == target)
            .count()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub fn released(&self) -> Vec<TaskId> {
        self.lock().released.clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.lock().verify_calls
    }
}

impl RuntimeDriver for FakeDriver {
    fn transition(&self, request: TransitionRequest) -> DriverFuture<'_, StatusReport> {
        let name = request.container.name.clone();
        let target = request.target;
        let script = {
            let mut state = self.lock();
            state.transitions.push(RecordedTransition {
                task_id: request.container.task_id.clone(),
                container: name.clone(),
                target,
            });
            state
                .scripts
                .get_mut(&(name.clone(), target))
                .and_then(VecDeque::pop_front)
                .unwrap_or(Script::Succeed)
        };
        debug!(task = %request.container.task_id, container = %name, target = %target, ?script, "fake driver transition");

        Box::pin(async move {
            let succeed = || {
                let report = StatusReport::ok(target).with_runtime_id(format!("fake-{name}"));
                if target == ContainerStatus::Stopped {
                    report.with_exit_code(Some(0))
                } else {
                    report
                }
            };
            match script {
                Script::Succeed => succeed(),
                Script::Fail(error) => StatusReport::failed(target, error),
                Script::WaitFor(gate) => {
                    gate.notified().await;
                    succeed()
                }
            }
        })
    }

    fn verify(&self, _containers: Vec<ContainerSnapshot>) -> DriverFuture<'_, Vec<ContainerChange>> {
        let changes = {
            let mut state = self.lock();
            state.verify_calls += 1;
            std::mem::take(&mut state.verify_changes)
        };
        Box::pin(async move { changes })
    }

    fn remove_container(
        &self,
        container: ContainerSnapshot,
    ) -> DriverFuture<'_, Result<(), DriverError>> {
        debug!(task = %container.task_id, container = %container.name, "fake driver removing container");
        self.lock().removed.push(container.name);
        Box::pin(async { Ok(()) })
    }

    fn release_addressing(&self, task_id: TaskId) -> DriverFuture<'_, ()> {
        self.lock().released.push(task_id);
        Box::pin(async {})
    }
}
