// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dependency::validate_task_spec;
use crate::errors::{AgentError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AgentError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.agent, raw.host, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_agent(cfg)?;
    validate_host(cfg)?;
    validate_tasks(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(AgentError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn ensure_non_zero(field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(AgentError::ConfigError(format!(
            "[agent].{field} must be greater than zero"
        )));
    }
    Ok(())
}

fn validate_agent(cfg: &RawConfigFile) -> Result<()> {
    let agent = &cfg.agent;
    ensure_non_zero("steady_state_poll_interval", agent.steady_state_poll_interval)?;
    ensure_non_zero("dependency_poll_interval", agent.dependency_poll_interval)?;
    ensure_non_zero("credentials_wait_timeout", agent.credentials_wait_timeout)?;
    ensure_non_zero("stopped_report_interval", agent.stopped_report_interval)?;

    if agent.stopped_report_max_attempts == 0 {
        return Err(AgentError::ConfigError(
            "[agent].stopped_report_max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if agent.event_channel_capacity == 0 {
        return Err(AgentError::ConfigError(
            "[agent].event_channel_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_host(cfg: &RawConfigFile) -> Result<()> {
    let host = &cfg.host;
    if host.port_range_start == 0 || host.port_range_start > host.port_range_end {
        return Err(AgentError::ConfigError(format!(
            "[host] port range {}-{} is empty or inverted",
            host.port_range_start, host.port_range_end
        )));
    }
    if host.stop_timeout.is_zero() {
        return Err(AgentError::ConfigError(
            "[host].stop_timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (id, manifest) in &cfg.task {
        if manifest.container.is_empty() {
            return Err(AgentError::ConfigError(format!(
                "task '{id}' must contain at least one [task.{id}.container.<name>] section"
            )));
        }
        validate_task_spec(&manifest.to_spec(id))?;
    }
    Ok(())
}
