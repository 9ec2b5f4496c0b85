mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::*;
use mandelhost::driver::{DriverError, DriverErrorKind};
use mandelhost::engine::{ContainerChange, DesiredStatusChange};
use mandelhost::errors::AgentError;
use mandelhost::fs::FileSystem;
use mandelhost::status::{ContainerStatus, DependencyCondition, TaskStatus};
use mandelhost::types::VolumeScope;
use mandelhost_test_utils::harness::Harness;

fn single(id: &str) -> TaskSpecBuilder {
    TaskSpecBuilder::new(id).container(ContainerSpecBuilder::new("app"))
}

async fn started(spec: TaskSpecBuilder) -> Harness {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    let spec = spec.build();
    let id = spec.id.clone();
    h.engine.apply_task(spec).await.expect("task accepted");
    h.wait_for_task_status(&id, TaskStatus::Running).await;
    h
}

#[tokio::test]
async fn single_container_reaches_running_in_order() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.engine.apply_task(single("t1").build()).await.unwrap();

    let (running, seen) = h.wait_for_task_status("t1", TaskStatus::Running).await;
    let seen: Vec<String> = seen.iter().map(describe).collect();
    assert_eq!(seen, vec!["container app CREATED", "container app RUNNING"]);
    assert_eq!(running.reason, None);
    assert_eq!(
        h.driver.targets_for("app"),
        vec![ContainerStatus::Created, ContainerStatus::Running]
    );

    // Idle until told otherwise.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.drain().is_empty());
    assert!(h.engine.registry().contains("t1"));
}

#[tokio::test]
async fn stopped_task_is_swept_and_forgotten() {
    let mut h = started(single("t1")).await;

    h.engine
        .set_desired_status("t1", DesiredStatusChange::new(TaskStatus::Stopped))
        .await
        .unwrap();

    let stopped = h
        .wait_for_container_status("t1", "app", ContainerStatus::Stopped)
        .await;
    assert_eq!(stopped.exit_code, Some(0));
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    h.wait_until_removed("t1").await;

    assert_eq!(h.driver.removed(), vec!["app".to_string()]);
    let driver = h.driver.clone();
    eventually(|| driver.released() == vec!["t1".to_string()]).await;
}

#[tokio::test]
async fn failed_create_of_a_dependency_stops_the_task() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.driver.fail(
        "b",
        ContainerStatus::Created,
        DriverError::new(DriverErrorKind::ImagePull, "no such image"),
    );
    let spec = TaskSpecBuilder::new("t1")
        .container(ContainerSpecBuilder::new("a").depends_on("b", DependencyCondition::Start))
        .container(ContainerSpecBuilder::new("b"))
        .build();
    h.engine.apply_task(spec).await.unwrap();

    let (stopped, seen) = h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    let reason = stopped.reason.expect("stopped task carries a reason");
    assert!(reason.contains("CannotPullContainerError"), "{reason}");

    let seen: Vec<String> = seen.iter().map(describe).collect();
    assert!(!seen.iter().any(|e| e == "container a CREATED" || e == "container a RUNNING"));
    // A was bumped straight to stopped without ever reaching the driver.
    assert!(seen.iter().any(|e| e == "container a STOPPED"), "{seen:?}");
    assert_eq!(h.driver.transitions().len(), 1);
    assert!(h.driver.targets_for("a").is_empty());
    h.wait_until_removed("t1").await;
    assert_eq!(h.driver.targets_for("b"), vec![ContainerStatus::Created]);
}

#[tokio::test]
async fn start_sequence_waits_for_earlier_stops() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    for seq in 1..=4 {
        h.engine.sequencer().add(seq, 1);
    }
    h.engine
        .apply_task(single("c").start_sequence(5).build())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.driver.transitions().is_empty());

    for seq in 1..=3 {
        h.engine.sequencer().done(seq);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.driver.transitions().is_empty());

    h.engine.sequencer().done(4);
    h.wait_for_task_status("c", TaskStatus::Running).await;
}

#[tokio::test]
async fn task_stopped_while_waiting_for_host_resources_skips_the_wait() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.engine.sequencer().add(1, 1);
    h.engine
        .apply_task(single("c").start_sequence(5).build())
        .await
        .unwrap();

    h.engine
        .set_desired_status("c", DesiredStatusChange::new(TaskStatus::Stopped))
        .await
        .unwrap();
    h.wait_for_task_status("c", TaskStatus::Stopped).await;
    h.wait_until_removed("c").await;

    assert!(h.driver.transitions().is_empty());
    assert!(h.engine.sequencer().is_blocked(5));
}

#[tokio::test]
async fn running_report_for_stopped_container_restops_once() {
    let mut h = started(
        TaskSpecBuilder::new("t1")
            .container(ContainerSpecBuilder::new("app"))
            .container(ContainerSpecBuilder::new("sidecar").non_essential()),
    )
    .await;

    h.engine
        .report_container_change(
            "t1",
            ContainerChange::new("sidecar", ContainerStatus::Stopped).with_exit_code(Some(0)),
        )
        .await
        .unwrap();
    h.wait_for_container_status("t1", "sidecar", ContainerStatus::Stopped)
        .await;

    for _ in 0..2 {
        h.engine
            .report_container_change("t1", ContainerChange::new("sidecar", ContainerStatus::Running))
            .await
            .unwrap();
    }

    let driver = h.driver.clone();
    eventually(|| driver.count("sidecar", ContainerStatus::Stopped) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.driver.count("sidecar", ContainerStatus::Stopped), 1);
    assert!(h.engine.registry().contains("t1"));
}

#[tokio::test]
async fn resources_are_created_first_and_swept_last() {
    let mut h = started(
        TaskSpecBuilder::new("t1")
            .cgroup()
            .volume("data", VolumeScope::Task)
            .container(ContainerSpecBuilder::new("app").volume("data")),
    )
    .await;

    assert!(h.fs.is_dir(Path::new("/cgroup/t1")));
    assert!(h.fs.exists(Path::new("/cgroup/t1/memory.max")));
    assert!(h.fs.is_dir(Path::new("/volumes/t1/data")));

    h.engine
        .set_desired_status("t1", DesiredStatusChange::stop(0))
        .await
        .unwrap();
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    h.wait_until_removed("t1").await;

    assert!(!h.fs.exists(Path::new("/cgroup/t1")));
    assert!(!h.fs.exists(Path::new("/volumes/t1/data")));
    assert_eq!(h.driver.removed(), vec!["app".to_string()]);
}

#[tokio::test]
async fn failing_resource_stops_the_task_before_any_container_starts() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.fs.fail_on("/cgroup/t1");
    h.engine
        .apply_task(single("t1").cgroup().build())
        .await
        .unwrap();

    let (stopped, _) = h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    let reason = stopped.reason.expect("reason");
    assert!(reason.starts_with("cgroup resource cgroup failed"), "{reason}");
    assert!(h.driver.transitions().is_empty());
    h.wait_until_removed("t1").await;
}

#[tokio::test]
async fn unacknowledged_stop_skips_the_sweep() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.set_auto_ack(false);
    h.engine.apply_task(single("t1").build()).await.unwrap();
    h.wait_for_task_status("t1", TaskStatus::Running).await;

    h.engine
        .set_desired_status("t1", DesiredStatusChange::new(TaskStatus::Stopped))
        .await
        .unwrap();
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    h.wait_until_removed("t1").await;

    assert!(h.driver.removed().is_empty());
}

#[tokio::test]
async fn repeated_push_for_a_managed_task_becomes_a_desired_change() {
    let mut h = started(single("t1")).await;
    let stop = h.driver.gate("app", ContainerStatus::Stopped);

    h.engine
        .apply_task(
            single("t1")
                .desired(TaskStatus::Stopped)
                .stop_sequence(3)
                .build(),
        )
        .await
        .unwrap();
    let sequencer = h.engine.sequencer().clone();
    eventually(|| sequencer.outstanding(3) == 1).await;

    stop.notify_one();
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    h.wait_until_removed("t1").await;
    assert_eq!(h.engine.sequencer().outstanding(3), 0);
    assert_eq!(h.driver.count("app", ContainerStatus::Created), 1);
}

#[tokio::test]
async fn missing_credentials_time_out_into_a_stop() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    h.engine
        .apply_task(
            TaskSpecBuilder::new("t1")
                .container(ContainerSpecBuilder::new("app").credentials("registry"))
                .build(),
        )
        .await
        .unwrap();

    let (stopped, _) = h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    assert!(stopped.reason.unwrap().contains("could not make progress"));
    assert!(h.driver.transitions().is_empty());
}

#[tokio::test]
async fn credentials_arriving_during_the_wait_unblock_the_task() {
    init_tracing();
    let mut settings = fast_settings();
    settings.credentials_wait_timeout = Duration::from_secs(3);
    let mut h = Harness::new(settings);
    let spec = || {
        TaskSpecBuilder::new("t1")
            .container(ContainerSpecBuilder::new("app").credentials("registry"))
    };
    h.engine.apply_task(spec().build()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.driver.transitions().is_empty());
    assert!(h.drain().is_empty());

    let pushed = Instant::now();
    h.engine
        .apply_task(spec().credentials("registry", "secret").build())
        .await
        .unwrap();
    let (running, _) = h.wait_for_task_status("t1", TaskStatus::Running).await;

    assert!(pushed.elapsed() < Duration::from_secs(3));
    assert_eq!(running.reason, None);
    assert_eq!(
        h.driver.targets_for("app"),
        vec![ContainerStatus::Created, ContainerStatus::Running]
    );
}

#[tokio::test]
async fn only_execution_credentials_are_released_with_the_task() {
    let mut h = started(
        TaskSpecBuilder::new("t1")
            .credentials("exec", "role")
            .credentials("registry", "secret")
            .execution_credentials("exec")
            .container(ContainerSpecBuilder::new("app").credentials("registry")),
    )
    .await;
    assert!(h.credentials.get("exec").is_some());

    h.engine
        .set_desired_status("t1", DesiredStatusChange::new(TaskStatus::Stopped))
        .await
        .unwrap();
    h.wait_until_removed("t1").await;

    assert!(h.credentials.get("exec").is_none());
    // Pull credentials are host-wide and stay for other tasks.
    assert!(h.credentials.get("registry").is_some());
}

#[tokio::test]
async fn endless_cleanup_grace_holds_the_task_until_shutdown() {
    init_tracing();
    let mut settings = fast_settings();
    settings.task_cleanup_wait = Duration::MAX;
    let mut h = Harness::new(settings);
    h.engine.apply_task(single("t1").build()).await.unwrap();
    h.wait_for_task_status("t1", TaskStatus::Running).await;

    h.engine
        .set_desired_status("t1", DesiredStatusChange::stop(1))
        .await
        .unwrap();
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    with_timeout(h.engine.sequencer().wait(2)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.engine.registry().contains("t1"));
    assert!(h.driver.removed().is_empty());

    h.engine.shutdown();
    with_timeout(h.engine.wait_until_idle()).await;
    assert!(!h.engine.registry().contains("t1"));
}

#[tokio::test]
async fn restored_task_resumes_from_saved_state() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    let spec = single("t1").build();
    let mut task = task_for(&spec);
    task.desired_status = TaskStatus::Running;
    task.known_status = TaskStatus::Running;
    task.sent.record(TaskStatus::Running);
    let app = task.container_mut("app").unwrap();
    app.desired_status = ContainerStatus::Running;
    app.known_status = ContainerStatus::Running;
    app.runtime_id = Some("proc-7".into());
    app.sent.record(ContainerStatus::Running);

    h.driver.set_verify_changes(vec![
        ContainerChange::new("app", ContainerStatus::Stopped).with_exit_code(Some(137)),
    ]);
    h.engine.restore_task(task).expect("restored");

    let stopped = h
        .wait_for_container_status("t1", "app", ContainerStatus::Stopped)
        .await;
    assert_eq!(stopped.exit_code, Some(137));
    h.wait_for_task_status("t1", TaskStatus::Stopped).await;
    h.wait_until_removed("t1").await;

    assert!(h.driver.verify_calls() >= 1);
    assert!(h.driver.transitions().is_empty());
    assert_eq!(h.driver.removed(), vec!["app".to_string()]);
}

#[tokio::test]
async fn restoring_a_live_task_is_rejected() {
    let h = started(single("t1")).await;

    let err = h
        .engine
        .restore_task(task_for(&single("t1").build()))
        .expect_err("duplicate task");
    assert!(matches!(err, AgentError::TaskAlreadyManaged(id) if id == "t1"));
}

#[tokio::test]
async fn unknown_task_is_reported_as_not_found() {
    init_tracing();
    let h = Harness::new(fast_settings());

    let err = h
        .engine
        .set_desired_status("nope", DesiredStatusChange::new(TaskStatus::Stopped))
        .await
        .expect_err("no such task");
    assert!(matches!(err, AgentError::TaskNotFound(_)));

    let err = h
        .engine
        .report_container_change("nope", ContainerChange::new("app", ContainerStatus::Running))
        .await
        .expect_err("no such task");
    assert!(matches!(err, AgentError::TaskNotFound(_)));
}

#[tokio::test]
async fn stop_all_assigns_increasing_sequences() {
    init_tracing();
    let mut h = Harness::new(fast_settings());
    for id in ["t1", "t2"] {
        h.engine.apply_task(single(id).build()).await.unwrap();
        h.wait_for_task_status(id, TaskStatus::Running).await;
    }

    let next = h.engine.stop_all(1).await;
    assert_eq!(next, 3);

    with_timeout(h.engine.wait_until_idle()).await;
    with_timeout(h.engine.sequencer().wait(next)).await;
    assert_eq!(h.driver.removed().len(), 2);
}

#[tokio::test]
async fn shutdown_abandons_tasks_without_cleanup() {
    let h = started(single("t1")).await;

    h.engine.shutdown();
    with_timeout(h.engine.wait_until_idle()).await;

    assert!(h.driver.removed().is_empty());
    assert_eq!(h.driver.count("app", ContainerStatus::Stopped), 0);
}
