// src/driver/stdout.rs

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{ContainerChange, ContainerEvent, HostEvent};
use crate::status::{ContainerStatus, HealthStatus};
use crate::task::TaskId;

/// Consume a container process's output.
///
/// Lines are logged at debug. If `healthy_on_stdout` is set and compiles,
/// the first stdout line matching it reports the container healthy through
/// `host_events`.
pub(super) fn spawn_output_monitors(
    task_id: TaskId,
    container: String,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    healthy_on_stdout: Option<&str>,
    host_events: mpsc::Sender<HostEvent>,
) {
    let healthy_regex = healthy_on_stdout.and_then(|pattern| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(
                task = %task_id,
                %container,
                %pattern,
                error = %e,
                "invalid healthy_on_stdout regex; ignoring"
            );
            None
        }
    });

    if let Some(stdout) = stdout {
        let task_id = task_id.clone();
        let container = container.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut reported = false;
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, %container, "stdout: {}", line);

                let Some(re) = &healthy_regex else { continue };
                if reported || !re.is_match(&line) {
                    continue;
                }
                reported = true;
                debug!(task = %task_id, %container, "stdout matched healthy_on_stdout; reporting healthy");
                let event = HostEvent {
                    task_id: task_id.clone(),
                    event: ContainerEvent::Status(
                        ContainerChange::new(container.clone(), ContainerStatus::Running)
                            .with_health(HealthStatus::Healthy),
                    ),
                };
                if host_events.send(event).await.is_err() {
                    debug!(task = %task_id, %container, "host event channel closed");
                }
            }
            debug!(task = %task_id, %container, "stdout monitor ended");
        });
    } else if healthy_regex.is_some() {
        warn!(task = %task_id, %container, "healthy_on_stdout configured but no stdout pipe available");
    }

    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, %container, "stderr: {}", line);
            }
        });
    }
}
