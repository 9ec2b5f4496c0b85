mod common;

use common::*;
use mandelhost::credentials::InMemoryCredentialsManager;
use mandelhost::dependency::BlockedOn;
use mandelhost::planner::{PlanReason, plan_container, plan_resource};
use mandelhost::status::{ContainerStatus, DependencyCondition, ResourceStatus, TaskStatus};
use mandelhost::task::{CGROUP_RESOURCE, Task, TaskSpec};

fn pushed(spec: &TaskSpec, desired: TaskStatus) -> Task {
    let mut task = task_for(spec);
    task.desired_status = desired;
    task.update_desired_status();
    task
}

fn single() -> TaskSpec {
    TaskSpecBuilder::new("t1")
        .container(ContainerSpecBuilder::new("app"))
        .build()
}

#[test]
fn container_at_desired_status_is_parked() {
    let creds = InMemoryCredentialsManager::new();
    let mut task = pushed(&single(), TaskStatus::Running);
    task.container_mut("app").unwrap().known_status = ContainerStatus::Running;

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, None);
    assert!(!plan.action_required);
    assert_eq!(plan.reason, Some(PlanReason::PastDesiredStatus));
}

#[test]
fn forward_steps_go_one_status_at_a_time() {
    let creds = InMemoryCredentialsManager::new();
    let mut task = pushed(&single(), TaskStatus::Running);

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, Some(ContainerStatus::Created));
    assert!(plan.action_required);

    task.container_mut("app").unwrap().known_status = ContainerStatus::Created;
    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, Some(ContainerStatus::Running));
    assert!(plan.action_required);
}

#[test]
fn running_container_needs_a_real_stop() {
    let creds = InMemoryCredentialsManager::new();
    let mut task = pushed(&single(), TaskStatus::Stopped);
    task.container_mut("app").unwrap().known_status = ContainerStatus::Running;

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, Some(ContainerStatus::Stopped));
    assert!(plan.action_required);
}

#[test]
fn never_started_container_is_bumped_to_stopped() {
    let creds = InMemoryCredentialsManager::new();
    let mut task = pushed(&single(), TaskStatus::Stopped);
    task.container_mut("app").unwrap().known_status = ContainerStatus::Created;

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, Some(ContainerStatus::Stopped));
    assert!(!plan.action_required);
}

#[test]
fn start_in_flight_is_stopped_for_real() {
    let creds = InMemoryCredentialsManager::new();
    let mut task = pushed(&single(), TaskStatus::Stopped);
    let app = task.container_mut("app").unwrap();
    app.known_status = ContainerStatus::Created;
    assert!(app.applied.try_claim(ContainerStatus::Running));

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert_eq!(plan.next_status, Some(ContainerStatus::Stopped));
    assert!(plan.action_required);
}

#[test]
fn blocked_plan_names_the_edge() {
    let creds = InMemoryCredentialsManager::new();
    let spec = TaskSpecBuilder::new("t1")
        .container(ContainerSpecBuilder::new("db"))
        .container(ContainerSpecBuilder::new("web").depends_on("db", DependencyCondition::Healthy))
        .build();
    let task = pushed(&spec, TaskStatus::Running);

    let plan = plan_container(&task, task.container("web").unwrap(), &creds);
    assert!(plan.is_blocked());
    assert_eq!(plan.next_status, None);
    assert_eq!(plan.reason, Some(PlanReason::DependencyBlocked));
    assert_eq!(
        plan.blocked_on,
        Some(BlockedOn::Container {
            name: "db".into(),
            condition: DependencyCondition::Healthy,
        })
    );
}

#[test]
fn missing_credentials_park_without_blocking() {
    let creds = InMemoryCredentialsManager::new();
    let spec = TaskSpecBuilder::new("t1")
        .container(ContainerSpecBuilder::new("app").credentials("registry"))
        .build();
    let task = pushed(&spec, TaskStatus::Running);

    let plan = plan_container(&task, task.container("app").unwrap(), &creds);
    assert!(plan.is_waiting_for_credentials());
    assert!(!plan.is_blocked());
    assert_eq!(plan.next_status, None);
}

#[test]
fn stop_order_parks_dependency_with_reason() {
    let creds = InMemoryCredentialsManager::new();
    let spec = TaskSpecBuilder::new("t1")
        .container(ContainerSpecBuilder::new("db"))
        .container(ContainerSpecBuilder::new("web").depends_on("db", DependencyCondition::Start))
        .build();
    let mut task = pushed(&spec, TaskStatus::Stopped);
    task.container_mut("db").unwrap().known_status = ContainerStatus::Running;
    task.container_mut("web").unwrap().known_status = ContainerStatus::Running;

    let plan = plan_container(&task, task.container("db").unwrap(), &creds);
    assert!(!plan.is_blocked());
    assert_eq!(plan.reason, Some(PlanReason::ShutdownOrder("web".into())));
}

#[test]
fn resource_creation_is_an_action() {
    let spec = TaskSpecBuilder::new("t1")
        .cgroup()
        .container(ContainerSpecBuilder::new("app"))
        .build();
    let task = pushed(&spec, TaskStatus::Running);

    let plan = plan_resource(&task, task.resource(CGROUP_RESOURCE).unwrap());
    assert_eq!(plan.next_status, Some(ResourceStatus::Created));
    assert!(plan.action_required);
}

#[test]
fn resource_removal_is_a_bump_after_containers_stop() {
    let spec = TaskSpecBuilder::new("t1")
        .cgroup()
        .container(ContainerSpecBuilder::new("app"))
        .build();
    let mut task = pushed(&spec, TaskStatus::Stopped);
    task.resource_mut(CGROUP_RESOURCE).unwrap().known_status = ResourceStatus::Created;
    task.container_mut("app").unwrap().known_status = ContainerStatus::Running;

    let plan = plan_resource(&task, task.resource(CGROUP_RESOURCE).unwrap());
    assert!(plan.is_blocked());

    task.container_mut("app").unwrap().known_status = ContainerStatus::Stopped;
    let plan = plan_resource(&task, task.resource(CGROUP_RESOURCE).unwrap());
    assert_eq!(plan.next_status, Some(ResourceStatus::Removed));
    assert!(!plan.action_required);
}

#[test]
fn never_created_resource_skips_straight_to_removed() {
    let spec = TaskSpecBuilder::new("t1")
        .cgroup()
        .container(ContainerSpecBuilder::new("app"))
        .build();
    let mut task = pushed(&spec, TaskStatus::Stopped);
    task.container_mut("app").unwrap().known_status = ContainerStatus::Stopped;

    let plan = plan_resource(&task, task.resource(CGROUP_RESOURCE).unwrap());
    assert_eq!(plan.next_status, Some(ResourceStatus::Removed));
    assert!(!plan.action_required);
}
