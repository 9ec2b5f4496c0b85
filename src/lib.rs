// src/lib.rs

pub mod cli;
pub mod config;
pub mod credentials;
pub mod dependency;
pub mod driver;
pub mod emitter;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod planner;
pub mod resources;
pub mod sequencer;
pub mod status;
pub mod task;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::credentials::InMemoryCredentialsManager;
use crate::driver::{PortAllocator, ProcessDriver};
use crate::emitter::StateChangeEvent;
use crate::engine::{EngineParts, EngineSettings, HostEvent, TaskEngine};
use crate::fs::{FileSystem, RealFileSystem};
use crate::resources::ResourceFactory;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the process runtime driver and host resources
/// - the task engine, its event consumer and host-event routing
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let capacity = cfg.agent.event_channel_capacity;
    let (host_tx, host_rx) = mpsc::channel::<HostEvent>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<StateChangeEvent>(capacity);

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let driver = ProcessDriver::new(
        host_tx,
        PortAllocator::new(cfg.host.port_range_start, cfg.host.port_range_end),
        cfg.host.stop_timeout,
    )
    .with_cgroups(Arc::clone(&fs), cfg.host.cgroup_root.clone());
    let engine = Arc::new(TaskEngine::new(EngineParts {
        driver: Arc::new(driver),
        credentials: Arc::new(InMemoryCredentialsManager::new()),
        resources: ResourceFactory::new(
            fs,
            cfg.host.cgroup_root.clone(),
            cfg.host.volume_root.clone(),
        ),
        settings: EngineSettings::from(&cfg.agent),
        events: event_tx,
    }));

    tokio::spawn(consume_events(event_rx));
    tokio::spawn(route_host_events(Arc::clone(&engine), host_rx));

    for spec in cfg.task_specs() {
        let id = spec.id.clone();
        engine
            .apply_task(spec)
            .await
            .with_context(|| format!("starting task '{id}'"))?;
    }
    info!(tasks = engine.registry().len(), "all manifest tasks applied");

    tokio::select! {
        _ = engine.wait_until_idle() => {
            info!("every task has been cleaned up");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("listening for Ctrl+C")?;
            info!("Ctrl+C received; stopping all tasks");
            let next = engine.stop_all(1).await;
            engine.sequencer().wait(next).await;
            info!("all tasks stopped");
        }
    }

    engine.shutdown();
    Ok(())
}

/// Log every state change and acknowledge it, standing in for the
/// control-plane submitter.
async fn consume_events(mut rx: mpsc::Receiver<StateChangeEvent>) {
    while let Some(event) = rx.recv().await {
        match &event {
            StateChangeEvent::Task(change) => info!(
                task = %change.task_id,
                status = %change.status,
                reason = ?change.reason,
                "task state change"
            ),
            StateChangeEvent::Container(change) => info!(
                task = %change.task_id,
                container = %change.container,
                status = %change.status,
                exit_code = ?change.exit_code,
                reason = ?change.reason,
                "container state change"
            ),
            StateChangeEvent::ManagedAgent(change) => info!(
                task = %change.task_id,
                container = %change.container,
                agent = %change.agent,
                status = %change.status,
                "managed agent state change"
            ),
        }
        event.acknowledge();
    }
    debug!("event consumer finished (channel closed)");
}

async fn route_host_events(engine: Arc<TaskEngine>, mut rx: mpsc::Receiver<HostEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = engine.report(event).await {
            debug!(error = %err, "dropping host event");
        }
    }
}

/// Print tasks, containers, dependencies and resources.
fn print_dry_run(cfg: &ConfigFile) {
    println!("mandelhost dry-run");
    println!(
        "  agent.image_pull_behavior = {:?}",
        cfg.agent.image_pull_behavior
    );
    println!(
        "  host.port_range = {}-{}",
        cfg.host.port_range_start, cfg.host.port_range_end
    );
    println!();

    println!("tasks ({}):", cfg.task.len());
    for spec in cfg.task_specs() {
        println!("  - {} (desired {})", spec.id, spec.desired_status);
        if spec.start_sequence != 0 {
            println!("      start_sequence: {}", spec.start_sequence);
        }
        for resource in &spec.resources {
            println!("      resource: {resource:?}");
        }
        for container in &spec.containers {
            let essential = if container.essential { "" } else { " (non-essential)" };
            println!("      container {}{essential}: {}", container.name, container.command);
            for edge in &container.depends_on {
                println!("        depends_on: {} {}", edge.container, edge.condition);
            }
            if !container.volumes.is_empty() {
                println!("        volumes: {:?}", container.volumes);
            }
            if container.ports > 0 {
                println!("        ports: {}", container.ports);
            }
        }
    }

    debug!("dry-run complete (nothing started)");
}
