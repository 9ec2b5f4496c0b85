// src/dependency/mod.rs

//! Dependency resolution for containers and resources.
//!
//! - `resolver`: pure checks of an entity's prerequisites against a snapshot
//!   of its task.
//! - `graph`: structural validation of a task's container graph (unknown
//!   references, self edges, cycles).

pub mod graph;
pub mod resolver;

pub use graph::validate_task_spec;
pub use resolver::{BlockedOn, Resolution, resolve_container, resolve_resource};
