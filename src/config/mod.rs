// src/config/mod.rs

//! Configuration loading and validation for mandelhost.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse compact duration strings (`duration.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate agent settings and every task manifest (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AgentSection, CgroupManifest, ConfigFile, ContainerManifest, DependsOnManifest, HostSection,
    RawConfigFile, TaskManifest, VolumeManifest,
};
