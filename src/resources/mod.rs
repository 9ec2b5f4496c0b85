// src/resources/mod.rs

//! Task-scoped host resources.
//!
//! Each resource kind implements `TaskResource` independently. The engine
//! only sees the shared contract: drive to a target status, and clean up
//! when the task is swept.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::fs::FileSystem;
use crate::status::ResourceStatus;
use crate::task::{Resource, ResourceSpec};

mod cgroup;
mod volume;

pub use cgroup::CgroupResource;
pub use volume::VolumeResource;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{kind} resource cannot be driven to {target}")]
    UnsupportedTransition {
        kind: &'static str,
        target: ResourceStatus,
    },

    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

pub type ResourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), ResourceError>> + Send + 'a>>;

pub trait TaskResource: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Perform the work needed to reach `target`.
    fn apply_transition(&self, target: ResourceStatus) -> ResourceFuture<'_>;

    /// Release everything the resource holds on the host.
    fn cleanup(&self) -> ResourceFuture<'_>;
}

/// Builds resource handlers for a task from its pushed resource specs.
#[derive(Debug, Clone)]
pub struct ResourceFactory {
    fs: Arc<dyn FileSystem>,
    cgroup_root: PathBuf,
    volume_root: PathBuf,
}

impl ResourceFactory {
    pub fn new(fs: Arc<dyn FileSystem>, cgroup_root: PathBuf, volume_root: PathBuf) -> Self {
        Self {
            fs,
            cgroup_root,
            volume_root,
        }
    }

    pub fn build(&self, task_id: &str, specs: &[ResourceSpec]) -> Vec<Resource> {
        specs
            .iter()
            .map(|spec| {
                let handler: Arc<dyn TaskResource> = match spec {
                    ResourceSpec::Cgroup {
                        memory_limit_bytes,
                        cpu_weight,
                    } => Arc::new(CgroupResource::new(
                        Arc::clone(&self.fs),
                        self.cgroup_root.join(task_id),
                        *memory_limit_bytes,
                        *cpu_weight,
                    )),
                    ResourceSpec::Volume { name, scope } => Arc::new(VolumeResource::new(
                        Arc::clone(&self.fs),
                        &self.volume_root,
                        task_id,
                        name,
                        *scope,
                    )),
                };
                Resource::new(spec.name(), handler)
            })
            .collect()
    }
}
