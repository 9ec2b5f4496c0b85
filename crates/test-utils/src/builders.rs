#![allow(dead_code)]

use std::time::Duration;

use mandelhost::credentials::Credentials;
use mandelhost::engine::EngineSettings;
use mandelhost::status::{DependencyCondition, TaskStatus};
use mandelhost::task::{ContainerDependency, ContainerSpec, ResourceSpec, TaskSpec};
use mandelhost::types::{ImagePullBehavior, VolumeScope};

/// Builder for `TaskSpec` to simplify test setup.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            spec: TaskSpec::new(id),
        }
    }

    pub fn desired(mut self, status: TaskStatus) -> Self {
        self.spec.desired_status = status;
        self
    }

    pub fn start_sequence(mut self, seq: u64) -> Self {
        self.spec.start_sequence = seq;
        self
    }

    pub fn stop_sequence(mut self, seq: u64) -> Self {
        self.spec.stop_sequence = seq;
        self
    }

    pub fn container(mut self, container: ContainerSpecBuilder) -> Self {
        self.spec.containers.push(container.build());
        self
    }

    pub fn cgroup(mut self) -> Self {
        self.spec.resources.push(ResourceSpec::Cgroup {
            memory_limit_bytes: Some(256 * 1024 * 1024),
            cpu_weight: Some(100),
        });
        self
    }

    pub fn volume(mut self, name: &str, scope: VolumeScope) -> Self {
        self.spec.resources.push(ResourceSpec::Volume {
            name: name.to_string(),
            scope,
        });
        self
    }

    pub fn execution_credentials(mut self, id: &str) -> Self {
        self.spec.execution_credentials_id = Some(id.to_string());
        self
    }

    pub fn credentials(mut self, id: &str, secret: &str) -> Self {
        self.spec.credentials.push(Credentials::new(id, secret));
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Builder for `ContainerSpec`. Containers are essential by default.
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ContainerSpec::new(name, format!("run-{name}")),
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        self.spec.command = command.to_string();
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.spec.essential = false;
        self
    }

    pub fn depends_on(mut self, container: &str, condition: DependencyCondition) -> Self {
        self.spec.depends_on.push(ContainerDependency {
            container: container.to_string(),
            condition,
        });
        self
    }

    pub fn volume(mut self, name: &str) -> Self {
        self.spec.volumes.push(name.to_string());
        self
    }

    pub fn credentials(mut self, id: &str) -> Self {
        self.spec.credentials_id = Some(id.to_string());
        self
    }

    pub fn healthy_on_stdout(mut self, pattern: &str) -> Self {
        self.spec.healthy_on_stdout = Some(pattern.to_string());
        self
    }

    pub fn ports(mut self, ports: u16) -> Self {
        self.spec.ports = ports;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

/// Millisecond-scale settings for engine tests.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        image_pull_behavior: ImagePullBehavior::Default,
        steady_state_poll_interval: Duration::from_millis(200),
        steady_state_poll_jitter: Duration::ZERO,
        dependency_poll_interval: Duration::from_millis(20),
        credentials_wait_timeout: Duration::from_millis(200),
        task_cleanup_wait: Duration::ZERO,
        task_cleanup_jitter: Duration::ZERO,
        stopped_report_interval: Duration::from_millis(10),
        stopped_report_max_attempts: 20,
        channel_capacity: 64,
    }
}
