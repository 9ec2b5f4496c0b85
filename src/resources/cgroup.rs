use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::status::ResourceStatus;

use super::{ResourceError, ResourceFuture, TaskResource};

/// Per-task cgroup directory with optional memory and cpu limits.
#[derive(Debug)]
pub struct CgroupResource {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    memory_limit_bytes: Option<u64>,
    cpu_weight: Option<u64>,
}

impl CgroupResource {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
        memory_limit_bytes: Option<u64>,
        cpu_weight: Option<u64>,
    ) -> Self {
        Self {
            fs,
            path,
            memory_limit_bytes,
            cpu_weight,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn create(&self) -> Result<(), ResourceError> {
        self.fs.create_dir_all(&self.path)?;
        if let Some(limit) = self.memory_limit_bytes {
            self.fs
                .write(&self.path.join("memory.max"), limit.to_string().as_bytes())?;
        }
        if let Some(weight) = self.cpu_weight {
            self.fs
                .write(&self.path.join("cpu.weight"), weight.to_string().as_bytes())?;
        }
        info!(path = ?self.path, "created task cgroup");
        Ok(())
    }
}

impl TaskResource for CgroupResource {
    fn kind(&self) -> &'static str {
        "cgroup"
    }

    fn apply_transition(&self, target: ResourceStatus) -> ResourceFuture<'_> {
        Box::pin(async move {
            match target {
                ResourceStatus::Created => self.create(),
                other => Err(ResourceError::UnsupportedTransition {
                    kind: self.kind(),
                    target: other,
                }),
            }
        })
    }

    fn cleanup(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            if self.fs.is_dir(&self.path) {
                self.fs.remove_dir_all(&self.path)?;
                debug!(path = ?self.path, "removed task cgroup");
            }
            Ok(())
        })
    }
}
