// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::Credentials;
use crate::status::{DependencyCondition, TaskStatus};
use crate::task::{ContainerDependency, ContainerSpec, ResourceSpec, TaskSpec};
use crate::types::{ImagePullBehavior, VolumeScope};

use super::duration;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [agent]
/// steady_state_poll_interval = "5m"
///
/// [host]
/// port_range_start = 40000
/// port_range_end = 41000
///
/// [task.web]
/// start_sequence = 1
///
/// [task.web.container.app]
/// command = "python -m http.server $MANDELBOX_PORT_0"
/// ports = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub host: HostSection,

    /// Task manifests keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskManifest>,
}

/// Validated configuration. Only built through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub agent: AgentSection,
    pub host: HostSection,
    pub task: BTreeMap<String, TaskManifest>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        agent: AgentSection,
        host: HostSection,
        task: BTreeMap<String, TaskManifest>,
    ) -> Self {
        Self { agent, host, task }
    }

    /// Every manifest as a task push, ordered by task id.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.task
            .iter()
            .map(|(id, manifest)| manifest.to_spec(id))
            .collect()
    }
}

/// `[agent]`: timing and policy for managed tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub image_pull_behavior: ImagePullBehavior,

    #[serde(deserialize_with = "duration::deserialize")]
    pub steady_state_poll_interval: Duration,

    #[serde(deserialize_with = "duration::deserialize")]
    pub steady_state_poll_jitter: Duration,

    /// Re-plan interval while blocked on ordering.
    #[serde(deserialize_with = "duration::deserialize")]
    pub dependency_poll_interval: Duration,

    #[serde(deserialize_with = "duration::deserialize")]
    pub credentials_wait_timeout: Duration,

    /// Grace period between a task stopping and its sweep.
    #[serde(deserialize_with = "duration::deserialize")]
    pub task_cleanup_wait: Duration,

    #[serde(deserialize_with = "duration::deserialize")]
    pub task_cleanup_jitter: Duration,

    #[serde(deserialize_with = "duration::deserialize")]
    pub stopped_report_interval: Duration,

    pub stopped_report_max_attempts: u32,

    pub event_channel_capacity: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            image_pull_behavior: ImagePullBehavior::Default,
            steady_state_poll_interval: Duration::from_secs(5 * 60),
            steady_state_poll_jitter: Duration::from_secs(30),
            dependency_poll_interval: Duration::from_secs(2),
            credentials_wait_timeout: Duration::from_secs(60),
            task_cleanup_wait: Duration::from_secs(3 * 60 * 60),
            task_cleanup_jitter: Duration::ZERO,
            stopped_report_interval: Duration::from_secs(5),
            stopped_report_max_attempts: 72,
            event_channel_capacity: 64,
        }
    }
}

/// `[host]`: where resources live and how processes are addressed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub cgroup_root: PathBuf,
    pub volume_root: PathBuf,
    pub port_range_start: u16,
    pub port_range_end: u16,

    /// How long a stop waits for a container process to exit.
    #[serde(deserialize_with = "duration::deserialize")]
    pub stop_timeout: Duration,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup/mandelhost"),
            volume_root: PathBuf::from("/var/lib/mandelhost/volumes"),
            port_range_start: 40000,
            port_range_end: 41000,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// `[task.<id>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskManifest {
    #[serde(default = "default_desired_status")]
    pub desired_status: TaskStatus,

    /// Wait for every stop sequence below this before starting; 0 = none.
    #[serde(default)]
    pub start_sequence: u64,

    /// Credentials id the task itself runs with.
    #[serde(default)]
    pub execution_credentials: Option<String>,

    #[serde(default)]
    pub cgroup: Option<CgroupManifest>,

    /// `[task.<id>.credentials]`: id -> secret.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    #[serde(default)]
    pub volume: BTreeMap<String, VolumeManifest>,

    #[serde(default)]
    pub container: BTreeMap<String, ContainerManifest>,
}

fn default_desired_status() -> TaskStatus {
    TaskStatus::Running
}

impl TaskManifest {
    pub fn to_spec(&self, id: &str) -> TaskSpec {
        let mut spec = TaskSpec::new(id);
        spec.desired_status = self.desired_status;
        spec.start_sequence = self.start_sequence;
        spec.execution_credentials_id = self.execution_credentials.clone();
        spec.credentials = self
            .credentials
            .iter()
            .map(|(id, secret)| Credentials::new(id, secret))
            .collect();
        spec.containers = self
            .container
            .iter()
            .map(|(name, container)| container.to_spec(name))
            .collect();

        if let Some(cgroup) = &self.cgroup {
            spec.resources.push(ResourceSpec::Cgroup {
                memory_limit_bytes: cgroup.memory_limit_bytes,
                cpu_weight: cgroup.cpu_weight,
            });
        }
        spec.resources
            .extend(self.volume.iter().map(|(name, volume)| ResourceSpec::Volume {
                name: name.clone(),
                scope: volume.scope,
            }));
        spec
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CgroupManifest {
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,

    #[serde(default)]
    pub cpu_weight: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeManifest {
    #[serde(default)]
    pub scope: VolumeScope,
}

/// `[task.<id>.container.<name>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerManifest {
    pub command: String,

    /// Whether the container stopping stops the whole task.
    #[serde(default = "default_essential")]
    pub essential: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub depends_on: Vec<DependsOnManifest>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub credentials: Option<String>,

    #[serde(default)]
    pub healthy_on_stdout: Option<String>,

    #[serde(default)]
    pub ports: u16,
}

fn default_essential() -> bool {
    true
}

impl ContainerManifest {
    pub fn to_spec(&self, name: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new(name, self.command.clone());
        spec.essential = self.essential;
        spec.env = self.env.clone();
        spec.depends_on = self
            .depends_on
            .iter()
            .map(|edge| ContainerDependency {
                container: edge.container.clone(),
                condition: edge.condition,
            })
            .collect();
        spec.volumes = self.volumes.clone();
        spec.credentials_id = self.credentials.clone();
        spec.healthy_on_stdout = self.healthy_on_stdout.clone();
        spec.ports = self.ports;
        spec
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependsOnManifest {
    pub container: String,

    #[serde(default = "default_condition")]
    pub condition: DependencyCondition,
}

fn default_condition() -> DependencyCondition {
    DependencyCondition::Start
}
