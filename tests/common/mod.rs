#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use mandelhost::driver::DriverError;
use mandelhost::emitter::StateChangeEvent;
use mandelhost::engine::{
    ContainerChange, ContainerEvent, DesiredStatusChange, ResourceChange, TaskCommand, TaskCore,
    TaskEvent,
};
use mandelhost::fs::mock::MockFileSystem;
use mandelhost::resources::ResourceFactory;
use mandelhost::status::{ContainerStatus, ResourceStatus};
use mandelhost::task::{Task, TaskSpec};
use mandelhost::types::ImagePullBehavior;

pub use mandelhost_test_utils::builders::{
    ContainerSpecBuilder, TaskSpecBuilder, fast_settings,
};
pub use mandelhost_test_utils::{eventually, init_tracing, with_timeout};

/// Live task built from `spec` on top of a mock file system.
pub fn task_for(spec: &TaskSpec) -> Task {
    let factory = ResourceFactory::new(
        Arc::new(MockFileSystem::new()),
        PathBuf::from("/cgroup"),
        PathBuf::from("/volumes"),
    );
    Task::new(spec, factory.build(&spec.id, &spec.resources))
}

/// Core for `spec` with its first push applied.
pub fn core_for(spec: &TaskSpec) -> TaskCore {
    core_with(spec, ImagePullBehavior::Default)
}

pub fn core_with(spec: &TaskSpec, pull: ImagePullBehavior) -> TaskCore {
    let mut core = TaskCore::new(task_for(spec), pull).with_initial_push(DesiredStatusChange {
        desired: spec.desired_status,
        stop_sequence: spec.stop_sequence,
    });
    core.initialize();
    core
}

pub fn report(core: &mut TaskCore, container: &str, status: ContainerStatus) -> Vec<TaskCommand> {
    core.step(TaskEvent::Container(ContainerEvent::Status(ContainerChange::new(
        container, status,
    ))))
}

pub fn report_change(core: &mut TaskCore, change: ContainerChange) -> Vec<TaskCommand> {
    core.step(TaskEvent::Container(ContainerEvent::Status(change)))
}

pub fn report_error(
    core: &mut TaskCore,
    container: &str,
    status: ContainerStatus,
    error: DriverError,
) -> Vec<TaskCommand> {
    report_change(core, ContainerChange::new(container, status).with_error(error))
}

pub fn report_resource(core: &mut TaskCore, resource: &str, status: ResourceStatus) -> Vec<TaskCommand> {
    core.step(TaskEvent::Resource(ResourceChange::new(resource, status)))
}

/// Container transitions dispatched by `commands`, as (container, target).
pub fn dispatched(commands: &[TaskCommand]) -> Vec<(String, ContainerStatus)> {
    commands
        .iter()
        .filter_map(|c| match c {
            TaskCommand::TransitionContainer(req) => Some((req.container.name.clone(), req.target)),
            _ => None,
        })
        .collect()
}

/// Container bookkeeping bumps in `commands`.
pub fn bumped(commands: &[TaskCommand]) -> Vec<(String, ContainerStatus)> {
    commands
        .iter()
        .filter_map(|c| match c {
            TaskCommand::PostContainerStatus { container, status } => {
                Some((container.clone(), *status))
            }
            _ => None,
        })
        .collect()
}

/// Short descriptions of emitted events, e.g. `container app CREATED`.
pub fn emitted(commands: &[TaskCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|c| match c {
            TaskCommand::Emit(event) => Some(describe(event)),
            _ => None,
        })
        .collect()
}

pub fn describe(event: &StateChangeEvent) -> String {
    match event {
        StateChangeEvent::Task(e) => format!("task {}", e.status),
        StateChangeEvent::Container(e) => format!("container {} {}", e.container, e.status),
        StateChangeEvent::ManagedAgent(e) => {
            format!("agent {}/{} {}", e.container, e.agent, e.status)
        }
    }
}

/// Feed every bookkeeping bump in `commands` back into the core, the way
/// the task loop does, until none are left. Returns everything produced.
pub fn settle(core: &mut TaskCore, commands: Vec<TaskCommand>) -> Vec<TaskCommand> {
    let mut pending = commands;
    let mut all = Vec::new();
    while !pending.is_empty() {
        let mut next = Vec::new();
        for command in pending {
            match &command {
                TaskCommand::PostContainerStatus { container, status } => {
                    next.extend(report(core, container, *status));
                }
                TaskCommand::PostResourceStatus { resource, status } => {
                    next.extend(report_resource(core, resource, *status));
                }
                _ => {}
            }
            all.push(command);
        }
        pending = next;
    }
    all
}
