// src/dependency/resolver.rs

use std::fmt;

use tracing::warn;

use crate::credentials::CredentialsManager;
use crate::status::{ContainerStatus, DependencyCondition, HealthStatus, ResourceStatus};
use crate::task::{Container, Resource, Task};

/// The edge an entity is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedOn {
    /// A `depends_on` edge to a peer container.
    Container {
        name: String,
        condition: DependencyCondition,
    },
    /// A resource the container needs before it can be created.
    Resource {
        name: String,
        required: ResourceStatus,
    },
    /// A container a resource waits on before changing status.
    ResourceContainer {
        container: String,
        satisfied: ContainerStatus,
    },
}

impl fmt::Display for BlockedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedOn::Container { name, condition } => {
                write!(f, "container {name} ({condition})")
            }
            BlockedOn::Resource { name, required } => write!(f, "resource {name} ({required})"),
            BlockedOn::ResourceContainer {
                container,
                satisfied,
            } => write!(f, "container {container} ({satisfied})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Satisfied,
    /// Waiting on something that may still happen.
    Blocked(BlockedOn),
    /// Required credentials have not arrived yet.
    CredentialsNotResolved(String),
    /// A container that depends on this one has not exited yet. Not an
    /// ordering block: the dependent is either stopping already or will be
    /// escalated like any other task that cannot move.
    ShutdownOrder { dependent: String },
    /// A prerequisite can never be met.
    Unresolvable(String),
}

impl Resolution {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Resolution::Satisfied)
    }
}

/// Check whether `container` may take its next step towards its desired status.
///
/// Moving towards a terminal status only waits on containers that depend on
/// this one (they must exit first). Moving forward checks, in order: the
/// resources needed for creation, the credentials needed for creation, then
/// every `depends_on` edge.
pub fn resolve_container(
    task: &Task,
    container: &Container,
    credentials: &dyn CredentialsManager,
) -> Resolution {
    if container.desired_status.is_terminal() {
        return resolve_shutdown(task, container);
    }

    if container.known_status < ContainerStatus::Created {
        for dep in &container.resource_dependencies {
            match task.resource(&dep.resource) {
                None => {
                    warn!(
                        task = %task.id,
                        container = %container.name(),
                        resource = %dep.resource,
                        "container depends on unknown resource"
                    );
                    return Resolution::Unresolvable(format!(
                        "resource {} required by container {} does not exist",
                        dep.resource,
                        container.name()
                    ));
                }
                Some(resource) if resource.known_status < dep.required => {
                    return Resolution::Blocked(BlockedOn::Resource {
                        name: dep.resource.clone(),
                        required: dep.required,
                    });
                }
                Some(_) => {}
            }
        }

        let required = task
            .execution_credentials_id
            .iter()
            .chain(container.spec.credentials_id.iter());
        for id in required {
            if !credentials.resolve(id) {
                return Resolution::CredentialsNotResolved(id.clone());
            }
        }
    }

    for edge in &container.spec.depends_on {
        let Some(peer) = task.container(&edge.container) else {
            warn!(
                task = %task.id,
                container = %container.name(),
                dependency = %edge.container,
                "container depends on unknown container"
            );
            return Resolution::Unresolvable(format!(
                "container {} depends on unknown container {}",
                container.name(),
                edge.container
            ));
        };

        if condition_met(peer, edge.condition) {
            continue;
        }
        if let Some(why) = never_met(peer, edge.condition) {
            return Resolution::Unresolvable(format!(
                "dependency {} ({}) of container {} can never be met: {why}",
                edge.container,
                edge.condition,
                container.name()
            ));
        }
        return Resolution::Blocked(BlockedOn::Container {
            name: edge.container.clone(),
            condition: edge.condition,
        });
    }

    Resolution::Satisfied
}

/// Check whether `resource` may move to `target`.
pub fn resolve_resource(task: &Task, resource: &Resource, target: ResourceStatus) -> Resolution {
    for dep in resource
        .container_dependencies
        .iter()
        .filter(|d| d.dependent == target)
    {
        let Some(peer) = task.container(&dep.container) else {
            warn!(
                task = %task.id,
                resource = %resource.name,
                container = %dep.container,
                "resource depends on unknown container"
            );
            return Resolution::Unresolvable(format!(
                "resource {} depends on unknown container {}",
                resource.name, dep.container
            ));
        };
        if peer.known_status < dep.satisfied {
            return Resolution::Blocked(BlockedOn::ResourceContainer {
                container: dep.container.clone(),
                satisfied: dep.satisfied,
            });
        }
    }
    Resolution::Satisfied
}

fn resolve_shutdown(task: &Task, container: &Container) -> Resolution {
    let dependent = task.containers.iter().find(|other| {
        !other.known_status.is_terminal()
            && other
                .spec
                .depends_on
                .iter()
                .any(|edge| edge.container == container.name())
    });
    match dependent {
        Some(other) => Resolution::ShutdownOrder {
            dependent: other.name().to_string(),
        },
        None => Resolution::Satisfied,
    }
}

fn condition_met(peer: &Container, condition: DependencyCondition) -> bool {
    match condition {
        DependencyCondition::Start => peer.known_status >= ContainerStatus::Created,
        DependencyCondition::Complete => peer.known_status.is_terminal(),
        DependencyCondition::Success => {
            peer.known_status.is_terminal() && peer.exit_code == Some(0)
        }
        DependencyCondition::Healthy => peer.health == HealthStatus::Healthy,
    }
}

fn never_met(peer: &Container, condition: DependencyCondition) -> Option<&'static str> {
    if peer.will_never_start() {
        return Some("container will never start");
    }
    match condition {
        DependencyCondition::Success if peer.known_status.is_terminal() => {
            Some("container did not exit successfully")
        }
        DependencyCondition::Healthy if peer.known_status.is_terminal() => {
            Some("container stopped without becoming healthy")
        }
        _ => None,
    }
}
