// src/engine/registry.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::task::TaskId;

use super::{ContainerEvent, DesiredStatusChange};

/// Senders into one managed task, plus its cancellation scope.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub control: mpsc::Sender<DesiredStatusChange>,
    pub containers: mpsc::Sender<ContainerEvent>,
    pub token: CancellationToken,
}

/// Host-wide map of live tasks. The lock is only held for map operations.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskHandle>>,
    changed: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a handle. Returns `false` if the task is already registered.
    pub fn insert(&self, id: TaskId, handle: TaskHandle) -> bool {
        let mut tasks = self.lock();
        if tasks.contains_key(&id) {
            return false;
        }
        debug!(task = %id, "registering task");
        tasks.insert(id, handle);
        true
    }

    pub fn get(&self, id: &str) -> Option<TaskHandle> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<TaskHandle> {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            debug!(task = %id, "removed task from registry");
            self.changed.notify_waiters();
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolve once the registry holds no tasks.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Resolve once `id` is no longer registered.
    pub async fn wait_until_removed(&self, id: &str) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.contains(id) {
                return;
            }
            notified.await;
        }
    }
}
