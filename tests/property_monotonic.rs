mod common;

use std::collections::HashMap;

use proptest::prelude::*;

use common::*;
use mandelhost::credentials::InMemoryCredentialsManager;
use mandelhost::driver::{DriverError, DriverErrorKind};
use mandelhost::emitter::StateChangeEvent;
use mandelhost::engine::{DesiredStatusChange, TaskCommand, TaskCore, TaskEvent};
use mandelhost::status::{ContainerStatus, DependencyCondition, TaskStatus};

const NAMES: [&str; 3] = ["a", "b", "c"];
const STATUSES: [ContainerStatus; 4] = [
    ContainerStatus::None,
    ContainerStatus::Created,
    ContainerStatus::Running,
    ContainerStatus::Stopped,
];
const ERROR_KINDS: [DriverErrorKind; 4] = [
    DriverErrorKind::ImagePull,
    DriverErrorKind::Timeout,
    DriverErrorKind::IoAmbiguous,
    DriverErrorKind::Other,
];

#[derive(Debug, Clone)]
enum Op {
    Report {
        container: usize,
        status: usize,
        error: Option<usize>,
    },
    Progress,
    Stop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..NAMES.len(), 0..STATUSES.len(), proptest::option::of(0..ERROR_KINDS.len()))
            .prop_map(|(container, status, error)| Op::Report { container, status, error }),
        3 => Just(Op::Progress),
        1 => Just(Op::Stop),
    ]
}

/// Observations that must only ever move forward.
#[derive(Default)]
struct Watermarks {
    known: HashMap<String, ContainerStatus>,
    desired: HashMap<String, ContainerStatus>,
    task_known: TaskStatus,
    task_desired: TaskStatus,
    emitted_container: HashMap<String, ContainerStatus>,
    emitted_task: Option<TaskStatus>,
    dispatched: HashMap<(String, ContainerStatus), usize>,
}

impl Watermarks {
    fn check_state(&mut self, core: &TaskCore) -> Result<(), TestCaseError> {
        let task = core.task();
        prop_assert!(task.known_status >= self.task_known, "task known went backwards");
        prop_assert!(task.desired_status >= self.task_desired, "task desired went backwards");
        self.task_known = task.known_status;
        self.task_desired = task.desired_status;

        for container in &task.containers {
            let name = container.name().to_string();
            let known = self.known.entry(name.clone()).or_default();
            prop_assert!(container.known_status >= *known, "{} known went backwards", name);
            *known = container.known_status;

            let desired = self.desired.entry(name.clone()).or_default();
            prop_assert!(container.desired_status >= *desired, "{} desired went backwards", name);
            *desired = container.desired_status;
        }
        Ok(())
    }

    fn check_commands(&mut self, commands: &[TaskCommand]) -> Result<(), TestCaseError> {
        for command in commands {
            match command {
                TaskCommand::Emit(StateChangeEvent::Container(e)) => {
                    if let Some(previous) = self.emitted_container.insert(e.container.clone(), e.status) {
                        prop_assert!(e.status > previous, "container {} re-emitted {}", e.container, e.status);
                    }
                }
                TaskCommand::Emit(StateChangeEvent::Task(e)) => {
                    if let Some(previous) = self.emitted_task.replace(e.status) {
                        prop_assert!(e.status > previous, "task re-emitted {}", e.status);
                    }
                }
                TaskCommand::TransitionContainer(request) => {
                    let count = self
                        .dispatched
                        .entry((request.container.name.clone(), request.target))
                        .or_default();
                    *count += 1;
                    // One claimed stop plus at most one re-stop.
                    let limit = if request.target == ContainerStatus::Stopped { 2 } else { 1 };
                    prop_assert!(
                        *count <= limit,
                        "{} dispatched to {} {} times",
                        request.container.name,
                        request.target,
                        count
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn statuses_only_move_forward(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let spec = TaskSpecBuilder::new("t1")
            .container(ContainerSpecBuilder::new("a"))
            .container(ContainerSpecBuilder::new("b").depends_on("a", DependencyCondition::Start))
            .container(ContainerSpecBuilder::new("c").non_essential())
            .build();
        let creds = InMemoryCredentialsManager::new();
        let mut core = core_for(&spec);
        let mut marks = Watermarks::default();
        marks.check_state(&core)?;

        for op in ops {
            let commands = match op {
                Op::Report { container, status, error } => {
                    let name = NAMES[container];
                    let status = STATUSES[status];
                    match error {
                        Some(kind) => report_error(
                            &mut core,
                            name,
                            status,
                            DriverError::new(ERROR_KINDS[kind], "injected"),
                        ),
                        None => report(&mut core, name, status),
                    }
                }
                Op::Progress => core.progress(&creds).commands,
                Op::Stop => core.step(TaskEvent::DesiredStatus(DesiredStatusChange::stop(0))),
            };
            marks.check_commands(&commands)?;
            marks.check_state(&core)?;
        }
    }
}
