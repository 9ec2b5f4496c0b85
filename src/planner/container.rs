use crate::credentials::CredentialsManager;
use crate::dependency::resolve_container;
use crate::status::ContainerStatus;
use crate::task::{Container, Task};

use super::{PlanReason, Transition};

/// Plan the next step for `container`.
pub fn plan_container(
    task: &Task,
    container: &Container,
    credentials: &dyn CredentialsManager,
) -> Transition<ContainerStatus> {
    let known = container.known_status;
    let desired = container.desired_status;

    if known >= desired {
        return Transition::parked(PlanReason::PastDesiredStatus);
    }

    if let Some(parked) = Transition::unresolved(resolve_container(task, container, credentials)) {
        return parked;
    }

    if desired.is_terminal() {
        if known.is_running() {
            return Transition::action(ContainerStatus::Stopped);
        }
        // Never reached running. If a start is already in flight it must
        // still be stopped for real, or its late result would revive it.
        if container.applied.get() == ContainerStatus::Running {
            return Transition::action(ContainerStatus::Stopped);
        }
        return Transition::bump(ContainerStatus::Stopped);
    }

    match known.next() {
        Some(next) => Transition::action(next),
        None => Transition::parked(PlanReason::PastDesiredStatus),
    }
}
