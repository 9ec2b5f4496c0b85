use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::status::ResourceStatus;
use crate::types::VolumeScope;

use super::{ResourceError, ResourceFuture, TaskResource};

#[derive(Debug)]
pub struct VolumeResource {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    scope: VolumeScope,
}

impl VolumeResource {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        root: &Path,
        task_id: &str,
        name: &str,
        scope: VolumeScope,
    ) -> Self {
        let path = match scope {
            VolumeScope::Task => root.join(task_id).join(name),
            VolumeScope::Shared => root.join("shared").join(name),
        };
        Self { fs, path, scope }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl TaskResource for VolumeResource {
    fn kind(&self) -> &'static str {
        "volume"
    }

    fn apply_transition(&self, target: ResourceStatus) -> ResourceFuture<'_> {
        Box::pin(async move {
            match target {
                ResourceStatus::Created => {
                    self.fs.create_dir_all(&self.path)?;
                    info!(path = ?self.path, scope = ?self.scope, "volume ready");
                    Ok(())
                }
                other => Err(ResourceError::UnsupportedTransition {
                    kind: self.kind(),
                    target: other,
                }),
            }
        })
    }

    fn cleanup(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.scope {
                VolumeScope::Shared => {
                    debug!(path = ?self.path, "leaving shared volume in place");
                }
                VolumeScope::Task => {
                    if self.fs.is_dir(&self.path) {
                        self.fs.remove_dir_all(&self.path)?;
                        debug!(path = ?self.path, "removed task volume");
                    }
                    // The task directory goes with its last volume.
                    if let Some(task_dir) = self.path.parent() {
                        if self.fs.remove_dir(task_dir).is_ok() {
                            debug!(path = ?task_dir, "removed task volume directory");
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
