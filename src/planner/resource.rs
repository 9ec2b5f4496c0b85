use crate::dependency::resolve_resource;
use crate::status::ResourceStatus;
use crate::task::{Resource, Task};

use super::{PlanReason, Transition};

/// Plan the next step for `resource`.
///
/// Terminal desired status is always a bookkeeping bump straight to the
/// terminal status; teardown happens when the task is swept.
pub fn plan_resource(task: &Task, resource: &Resource) -> Transition<ResourceStatus> {
    let known = resource.known_status;
    let desired = resource.desired_status;

    if known >= desired {
        return Transition::parked(PlanReason::PastDesiredStatus);
    }

    let target = if desired.is_terminal() {
        ResourceStatus::TERMINAL
    } else {
        known.next()
    };

    if let Some(parked) = Transition::unresolved(resolve_resource(task, resource, target)) {
        return parked;
    }

    if target.is_terminal() {
        Transition::bump(target)
    } else {
        Transition::action(target)
    }
}
