use std::io::Write;
use std::time::Duration;

use taskmux_core::api as core;
use taskmux_core::error::CliError;
use tokio::sync::mpsc;

use crate::app::{build_engine, Engine};

use super::cli::RunArgs;

const WAITING_CHECK_INTERVAL_MS: u64 = 2_000;
const WAITING_WINDOW_BYTES: usize = 4 * 1024;

pub async fn run(cfg: core::AppConfig, args: RunArgs) -> Result<i32, CliError> {
    let Engine {
        registry,
        coordinator,
        persistence,
        events_out,
        mut task_events,
        config,
    } = build_engine(cfg).await?;

    let name = args
        .name
        .clone()
        .unwrap_or_else(|| truncate_name(&args.prompt));
    let task = registry
        .create_task(core::NewTask {
            name: name.clone(),
            description: args.prompt.clone(),
            parent_id: args.parent.clone(),
            dependencies: args.dependencies.clone(),
            project_dir: args.dir.clone(),
        })
        .await;
    persistence.schedule_save();

    if !registry.are_dependencies_met(&task.id).await {
        registry
            .update_status(&task.id, core::TaskStatus::Error)
            .await?;
        persistence.flush().await?;
        return Err(CliError::Command(format!(
            "dependencies of task {} are not complete",
            task.id
        )));
    }

    let spawn_args = core::SpawnArgs {
        task_id: task.id.clone(),
        title: name,
        prompt: args.prompt.clone(),
        directory: args.dir.clone(),
        mode: None,
        tool_servers: config.tool_servers.clone(),
    };
    let spawn_result = if args.resume {
        coordinator.spawn_with_resume(spawn_args).await
    } else {
        coordinator.spawn(spawn_args).await
    };
    let worker_id = match spawn_result {
        Ok(worker_id) => worker_id,
        Err(e) => {
            registry
                .update_status(&task.id, core::TaskStatus::Error)
                .await?;
            persistence.flush().await?;
            return Err(e.into());
        }
    };
    registry.assign_worker(&task.id, &worker_id).await?;
    persistence.schedule_save();
    tracing::info!("task {} running on worker {worker_id}", task.id);

    let exit_code = stream_until_terminal(
        &registry,
        &coordinator,
        &persistence,
        events_out.as_ref(),
        &mut task_events,
        &task.id,
        &worker_id,
    )
    .await?;
    persistence.flush().await?;
    Ok(exit_code)
}

/// Consume task events, mirroring them into the registry, until the task
/// reaches a terminal status. A periodic check classifies recent output to
/// surface waiting states as the blocked/running cycle.
async fn stream_until_terminal(
    registry: &core::TaskRegistry,
    coordinator: &core::ProcessCoordinator,
    persistence: &core::PersistenceManager,
    events_out: Option<&core::EventsOutTx>,
    task_events: &mut mpsc::UnboundedReceiver<core::TaskEvent>,
    task_id: &str,
    worker_id: &str,
) -> Result<i32, CliError> {
    let mut waiting_check =
        tokio::time::interval(Duration::from_millis(WAITING_CHECK_INTERVAL_MS));
    waiting_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = task_events.recv() => {
                let Some(event) = event else {
                    return Err(CliError::Command("task event stream closed".to_string()));
                };
                if let Some(tx) = events_out {
                    tx.send_event(&event).await;
                }
                match event {
                    core::TaskEvent::Output { task_id: event_task, chunk, .. } => {
                        if event_task == task_id {
                            print!("{chunk}");
                            let _ = std::io::stdout().flush();
                            registry.append_output(task_id, &chunk).await?;
                            persistence.schedule_save();
                        }
                    }
                    core::TaskEvent::Completed { task_id: event_task, .. } if event_task == task_id => {
                        ensure_unblocked(registry, task_id).await?;
                        let done = registry.complete_task(task_id, 0).await?;
                        println!();
                        if let Some(result) = &done.structured_result {
                            println!("structured result:");
                            println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
                        }
                        return Ok(0);
                    }
                    core::TaskEvent::Aborted { task_id: event_task, .. } if event_task == task_id => {
                        ensure_unblocked(registry, task_id).await?;
                        registry.update_status(task_id, core::TaskStatus::Stopped).await?;
                        eprintln!("task {task_id} aborted");
                        return Ok(130);
                    }
                    core::TaskEvent::Error { task_id: event_task, message, .. } if event_task == task_id => {
                        ensure_unblocked(registry, task_id).await?;
                        registry.complete_task(task_id, 1).await?;
                        eprintln!("task {task_id} failed: {message}");
                        return Ok(1);
                    }
                    core::TaskEvent::ToolStart { task_id: event_task, tool } if event_task == task_id => {
                        tracing::debug!("tool started: {tool}");
                    }
                    core::TaskEvent::ToolEnd { task_id: event_task, tool } if event_task == task_id => {
                        tracing::debug!("tool finished: {tool}");
                    }
                    _ => {}
                }
            }

            _ = waiting_check.tick() => {
                check_waiting_state(registry, coordinator, persistence, task_id, worker_id).await?;
            }
        }
    }
}

async fn check_waiting_state(
    registry: &core::TaskRegistry,
    coordinator: &core::ProcessCoordinator,
    persistence: &core::PersistenceManager,
    task_id: &str,
    worker_id: &str,
) -> Result<(), CliError> {
    let Some(worker) = coordinator.get_worker(worker_id).await else {
        return Ok(());
    };
    let recent =
        String::from_utf8_lossy(&worker.output.last_bytes(WAITING_WINDOW_BYTES)).to_string();
    let stripped = core::strip_control_sequences(&recent);
    let waiting = core::detect_waiting_state(&stripped);

    let Some(task) = registry.get_task(task_id).await else {
        return Ok(());
    };
    match (waiting, task.status) {
        (Some(state), core::TaskStatus::Running) => {
            let reason = match state {
                core::WaitingState::Question => "waiting on a question",
                core::WaitingState::Permission => "waiting on a permission decision",
                core::WaitingState::Confirmation => "waiting on a confirmation",
            };
            registry
                .mark_task_blocked(task_id, reason, Vec::new())
                .await?;
            persistence.schedule_save();
            eprintln!("task {task_id} is {reason}");
        }
        (None, core::TaskStatus::Blocked) => {
            registry.unblock_task(task_id).await?;
            persistence.schedule_save();
        }
        _ => {}
    }
    Ok(())
}

/// Terminal transitions are only legal from Running; lift a blocked task
/// back first.
async fn ensure_unblocked(registry: &core::TaskRegistry, task_id: &str) -> Result<(), CliError> {
    if let Some(task) = registry.get_task(task_id).await {
        if task.status == core::TaskStatus::Blocked {
            registry.unblock_task(task_id).await?;
        }
    }
    Ok(())
}

fn truncate_name(prompt: &str) -> String {
    const MAX: usize = 48;
    let line = prompt.lines().next().unwrap_or(prompt);
    if line.len() <= MAX {
        line.to_string()
    } else {
        let end = line
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &line[..end])
    }
}
