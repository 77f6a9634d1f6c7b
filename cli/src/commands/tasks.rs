use std::time::Duration;

use taskmux_core::api as core;
use taskmux_core::error::CliError;

use super::cli::{TasksArgs, TasksCommand};

pub async fn run(cfg: core::AppConfig, args: TasksArgs) -> Result<i32, CliError> {
    let registry = core::TaskRegistry::new();
    let data_dir = cfg
        .persistence
        .directory
        .clone()
        .ok_or_else(|| CliError::Config("persistence directory unset".to_string()))?;
    let persistence = core::PersistenceManager::new(
        data_dir,
        registry.clone(),
        Duration::from_millis(cfg.persistence.save_debounce_ms),
    );
    persistence.load().await?;

    match args.command {
        TasksCommand::List => {
            let tasks = registry.list_tasks().await;
            if tasks.is_empty() {
                println!("no active tasks");
            }
            for task in tasks {
                println!(
                    "{}  {:<9}  {}  {}",
                    task.id,
                    format!("{:?}", task.status).to_lowercase(),
                    task.created_at.format("%Y-%m-%d %H:%M"),
                    task.name
                );
            }
            let archived = persistence.archived_tasks().await;
            if !archived.is_empty() {
                println!("-- archived ({}) --", archived.len());
                for meta in archived {
                    println!(
                        "{}  {:<9}  ~{}B history  {}",
                        meta.id,
                        format!("{:?}", meta.status).to_lowercase(),
                        meta.history_size,
                        meta.name
                    );
                }
            }
            Ok(0)
        }

        TasksCommand::Show { id } => match registry.get_task(&id).await {
            Some(task) => {
                let rendered = serde_json::to_string_pretty(&task)
                    .map_err(|e| CliError::Command(e.to_string()))?;
                println!("{rendered}");
                Ok(0)
            }
            None => {
                eprintln!("task {id} not found");
                Ok(1)
            }
        },

        TasksCommand::History { id, max } => {
            let max = max.or(Some(cfg.persistence.history_read_max));
            let read = match persistence.read_task_history(&id, max).await {
                Ok(read) => read,
                Err(_) => persistence.read_archived_history(&id, max).await?,
            };
            if read.truncated {
                eprintln!("(truncated to the trailing {} bytes)", max.unwrap_or(0));
            }
            println!("{}", core::clean_output_from_markers(&read.content));
            Ok(0)
        }

        TasksCommand::Delete { id } => {
            registry.delete_task(&id).await?;
            persistence.flush().await?;
            println!("deleted {id} and its sub-tasks");
            Ok(0)
        }

        TasksCommand::Stuck { timeout_secs } => {
            let stuck = registry
                .detect_stuck_tasks(Duration::from_secs(timeout_secs))
                .await;
            if stuck.is_empty() {
                println!("no stuck tasks");
                return Ok(0);
            }
            for task in stuck {
                println!(
                    "{}  last progress {}  {}",
                    task.id,
                    task.progress_reference().format("%Y-%m-%d %H:%M:%S"),
                    task.name
                );
            }
            Ok(0)
        }

        TasksCommand::Archive { keep } => {
            let archived = persistence.archive_completed(keep).await?;
            persistence.flush().await?;
            println!("archived {archived} tasks");
            Ok(0)
        }
    }
}
