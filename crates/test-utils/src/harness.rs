use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use mandelhost::credentials::InMemoryCredentialsManager;
use mandelhost::emitter::{ContainerStateChange, StateChangeEvent, TaskStateChange};
use mandelhost::engine::{EngineParts, EngineSettings, TaskEngine};
use mandelhost::fs::mock::MockFileSystem;
use mandelhost::resources::ResourceFactory;
use mandelhost::status::{ContainerStatus, TaskStatus};

use crate::fake_driver::FakeDriver;
use crate::with_timeout;

pub const CGROUP_ROOT: &str = "/cgroup";
pub const VOLUME_ROOT: &str = "/volumes";

/// A `TaskEngine` wired to a fake driver, in-memory credentials and a mock
/// file system, with a consumer that records (and by default acknowledges)
/// every emitted event.
pub struct Harness {
    pub engine: Arc<TaskEngine>,
    pub driver: FakeDriver,
    pub credentials: Arc<InMemoryCredentialsManager>,
    pub fs: MockFileSystem,
    auto_ack: Arc<AtomicBool>,
    events: mpsc::UnboundedReceiver<StateChangeEvent>,
}

impl Harness {
    pub fn new(settings: EngineSettings) -> Self {
        let driver = FakeDriver::new();
        let credentials = Arc::new(InMemoryCredentialsManager::new());
        let fs = MockFileSystem::new();
        let (event_tx, mut event_rx) = mpsc::channel::<StateChangeEvent>(settings.channel_capacity);

        let engine = Arc::new(TaskEngine::new(EngineParts {
            driver: Arc::new(driver.clone()),
            credentials: credentials.clone(),
            resources: ResourceFactory::new(
                Arc::new(fs.clone()),
                PathBuf::from(CGROUP_ROOT),
                PathBuf::from(VOLUME_ROOT),
            ),
            settings,
            events: event_tx,
        }));

        let auto_ack = Arc::new(AtomicBool::new(true));
        let (seen_tx, events) = mpsc::unbounded_channel();
        let ack = Arc::clone(&auto_ack);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if ack.load(Ordering::SeqCst) {
                    event.acknowledge();
                }
                if seen_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self {
            engine,
            driver,
            credentials,
            fs,
            auto_ack,
            events,
        }
    }

    /// Stop (or resume) acknowledging events as they arrive.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    pub async fn next_event(&mut self) -> StateChangeEvent {
        with_timeout(self.events.recv())
            .await
            .expect("event channel closed")
    }

    /// Every event received so far that has not been consumed yet.
    pub fn drain(&mut self) -> Vec<StateChangeEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Consume events until a task change with `status` arrives for `task_id`.
    /// Returns it together with every event seen on the way.
    pub async fn wait_for_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
    ) -> (TaskStateChange, Vec<StateChangeEvent>) {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            if let StateChangeEvent::Task(change) = &event {
                if change.task_id == task_id && change.status == status {
                    return (change.clone(), seen);
                }
            }
            seen.push(event);
        }
    }

    pub async fn wait_for_container_status(
        &mut self,
        task_id: &str,
        container: &str,
        status: ContainerStatus,
    ) -> ContainerStateChange {
        loop {
            if let StateChangeEvent::Container(change) = self.next_event().await {
                if change.task_id == task_id
                    && change.container == container
                    && change.status == status
                {
                    return change;
                }
            }
        }
    }

    pub async fn wait_until_removed(&self, task_id: &str) {
        with_timeout(self.engine.registry().wait_until_removed(task_id)).await;
    }
}
