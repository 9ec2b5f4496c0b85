use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use mandelhost::config::{ConfigFile, load_and_validate, parse_duration};
use mandelhost::errors::AgentError;
use mandelhost::status::{DependencyCondition, TaskStatus};
use mandelhost::task::ResourceSpec;
use mandelhost::types::{ImagePullBehavior, VolumeScope};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn load(contents: &str) -> Result<ConfigFile, AgentError> {
    let file = write_config(contents);
    load_and_validate(file.path())
}

fn config_error(contents: &str) -> String {
    match load(contents) {
        Err(AgentError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn full_manifest_is_parsed_into_task_specs() {
    let config = load(
        r#"
[agent]
image_pull_behavior = "prefer-cached"
steady_state_poll_interval = "30s"
dependency_poll_interval = "250ms"
task_cleanup_wait = "1h"

[host]
port_range_start = 50000
port_range_end = 50010
stop_timeout = "3s"

[task.web]
start_sequence = 2
execution_credentials = "exec"

[task.web.credentials]
exec = "s3cret"

[task.web.cgroup]
memory_limit_bytes = 1048576

[task.web.volume.data]

[task.web.volume.cache]
scope = "shared"

[task.web.container.db]
command = "run-db"
healthy_on_stdout = "ready"

[task.web.container.app]
command = "run-app"
ports = 2
volumes = ["data"]
env = { MODE = "test" }
depends_on = [{ container = "db", condition = "HEALTHY" }]

[task.web.container.sidecar]
command = "run-sidecar"
essential = false
depends_on = [{ container = "app" }]
"#,
    )
    .expect("config is valid");

    assert_eq!(config.agent.image_pull_behavior, ImagePullBehavior::PreferCached);
    assert_eq!(config.agent.steady_state_poll_interval, Duration::from_secs(30));
    assert_eq!(config.agent.dependency_poll_interval, Duration::from_millis(250));
    assert_eq!(config.agent.task_cleanup_wait, Duration::from_secs(3600));
    assert_eq!(config.agent.stopped_report_max_attempts, 72);
    assert_eq!(config.host.port_range_start, 50000);
    assert_eq!(config.host.stop_timeout, Duration::from_secs(3));

    let specs = config.task_specs();
    assert_eq!(specs.len(), 1);
    let web = &specs[0];
    assert_eq!(web.id, "web");
    assert_eq!(web.desired_status, TaskStatus::Running);
    assert_eq!(web.start_sequence, 2);
    assert_eq!(web.execution_credentials_id.as_deref(), Some("exec"));
    assert_eq!(web.credentials.len(), 1);

    let names: Vec<&str> = web.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["app", "db", "sidecar"]);

    let app = &web.containers[0];
    assert!(app.essential);
    assert_eq!(app.ports, 2);
    assert_eq!(app.env.get("MODE").map(String::as_str), Some("test"));
    assert_eq!(app.depends_on[0].condition, DependencyCondition::Healthy);

    let sidecar = &web.containers[2];
    assert!(!sidecar.essential);
    assert_eq!(sidecar.depends_on[0].condition, DependencyCondition::Start);

    assert!(matches!(
        web.resources[0],
        ResourceSpec::Cgroup {
            memory_limit_bytes: Some(1048576),
            cpu_weight: None
        }
    ));
    let volumes: Vec<(&str, VolumeScope)> = web.resources[1..]
        .iter()
        .filter_map(|r| match r {
            ResourceSpec::Volume { name, scope } => Some((name.as_str(), *scope)),
            _ => None,
        })
        .collect();
    assert_eq!(
        volumes,
        vec![("cache", VolumeScope::Shared), ("data", VolumeScope::Task)]
    );
}

#[test]
fn minimal_manifest_uses_defaults() {
    let config = load(
        r#"
[task.one.container.main]
command = "true"
"#,
    )
    .unwrap();

    assert_eq!(config.agent.image_pull_behavior, ImagePullBehavior::Default);
    assert_eq!(config.host.port_range_start, 40000);
    let spec = &config.task_specs()[0];
    assert_eq!(spec.start_sequence, 0);
    assert!(spec.resources.is_empty());
    assert_eq!(spec.containers[0].ports, 0);
}

#[test]
fn stopped_desired_status_is_accepted() {
    let config = load(
        r#"
[task.one]
desired_status = "STOPPED"

[task.one.container.main]
command = "true"
"#,
    )
    .unwrap();
    assert_eq!(config.task_specs()[0].desired_status, TaskStatus::Stopped);
}

#[test]
fn config_without_tasks_is_rejected() {
    let msg = config_error(
        r#"
[agent]
steady_state_poll_interval = "1m"
"#,
    );
    assert!(msg.contains("at least one [task.<id>]"));
}

#[test]
fn task_without_containers_is_rejected() {
    let msg = config_error(
        r#"
[task.empty]
start_sequence = 1
"#,
    );
    assert!(msg.contains("task 'empty'"));
}

#[test]
fn zero_intervals_are_rejected() {
    let msg = config_error(
        r#"
[agent]
dependency_poll_interval = "0s"

[task.one.container.main]
command = "true"
"#,
    );
    assert!(msg.contains("dependency_poll_interval"));
}

#[test]
fn inverted_port_range_is_rejected() {
    let msg = config_error(
        r#"
[host]
port_range_start = 5000
port_range_end = 4000

[task.one.container.main]
command = "true"
"#,
    );
    assert!(msg.contains("port range"));
}

#[test]
fn unknown_dependency_is_rejected() {
    let msg = config_error(
        r#"
[task.one.container.app]
command = "true"
depends_on = [{ container = "ghost" }]
"#,
    );
    assert!(msg.contains("unknown dependency"));
    assert!(msg.contains("ghost"));
}

#[test]
fn unknown_volume_is_rejected() {
    let msg = config_error(
        r#"
[task.one.container.app]
command = "true"
volumes = ["missing"]
"#,
    );
    assert!(msg.contains("unknown volume 'missing'"));
}

#[test]
fn dependency_cycle_is_rejected() {
    let result = load(
        r#"
[task.one.container.a]
command = "true"
depends_on = [{ container = "b" }]

[task.one.container.b]
command = "true"
depends_on = [{ container = "a" }]
"#,
    );
    match result {
        Err(AgentError::DependencyCycle(msg)) => {
            assert!(msg.contains('a') || msg.contains('b'));
        }
        Err(e) => panic!("Expected DependencyCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn bad_duration_is_a_toml_error() {
    let file = write_config(
        r#"
[agent]
credentials_wait_timeout = "ten seconds"

[task.one.container.main]
command = "true"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(AgentError::TomlError(_))
    ));
}

#[test]
fn duration_units() {
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("3d").is_err());
}
