// src/dependency/graph.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{AgentError, Result};
use crate::task::{ResourceSpec, TaskSpec};

/// Structural checks for a task's containers before the task is accepted.
///
/// Rejects tasks without containers, duplicate container names, unknown or
/// self `depends_on` references, unknown volume references and dependency
/// cycles.
pub fn validate_task_spec(spec: &TaskSpec) -> Result<()> {
    if spec.containers.is_empty() {
        return Err(AgentError::ConfigError(format!(
            "task '{}' must contain at least one container",
            spec.id
        )));
    }

    let mut names = BTreeSet::new();
    for container in &spec.containers {
        if !names.insert(container.name.as_str()) {
            return Err(AgentError::ConfigError(format!(
                "task '{}' has duplicate container '{}'",
                spec.id, container.name
            )));
        }
    }

    let volumes: BTreeSet<&str> = spec
        .resources
        .iter()
        .filter(|r| matches!(r, ResourceSpec::Volume { .. }))
        .map(ResourceSpec::name)
        .collect();

    for container in &spec.containers {
        for edge in &container.depends_on {
            if edge.container == container.name {
                return Err(AgentError::ConfigError(format!(
                    "container '{}' in task '{}' cannot depend on itself",
                    container.name, spec.id
                )));
            }
            if !names.contains(edge.container.as_str()) {
                return Err(AgentError::ConfigError(format!(
                    "container '{}' in task '{}' has unknown dependency '{}'",
                    container.name, spec.id, edge.container
                )));
            }
        }
        for volume in &container.volumes {
            if !volumes.contains(volume.as_str()) {
                return Err(AgentError::ConfigError(format!(
                    "container '{}' in task '{}' mounts unknown volume '{}'",
                    container.name, spec.id, volume
                )));
            }
        }
    }

    check_acyclic(spec)
}

fn check_acyclic(spec: &TaskSpec) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for container in &spec.containers {
        graph.add_node(container.name.as_str());
    }
    for container in &spec.containers {
        for edge in &container.depends_on {
            graph.add_edge(edge.container.as_str(), container.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(AgentError::DependencyCycle(format!(
            "task '{}' has a dependency cycle involving container '{}'",
            spec.id,
            cycle.node_id()
        ))),
    }
}
