mod common;

use std::time::Duration;

use common::ScriptedDriver;
use taskmux_core::api::{
    BackendKind, ControlConfig, NewTask, PersistenceManager, ProcessCoordinator, SpawnArgs,
    TaskEvent, TaskRegistry, TaskStatus,
};
use tokio::sync::mpsc;

fn control() -> ControlConfig {
    ControlConfig {
        prompt_timeout_ms: 2_000,
        capture_bytes: 64 * 1024,
        stuck_timeout_ms: 60_000,
    }
}

fn spawn_args(task_id: &str, prompt: &str) -> SpawnArgs {
    SpawnArgs {
        task_id: task_id.to_string(),
        title: "integration".to_string(),
        prompt: prompt.to_string(),
        ..Default::default()
    }
}

/// Pump coordinator events into the registry until the task completes,
/// the way the orchestration layer does.
async fn drive_to_completion(
    registry: &TaskRegistry,
    events: &mut mpsc::UnboundedReceiver<TaskEvent>,
    task_id: &str,
    exit_code: i32,
) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timely event")
            .expect("open channel");
        match event {
            TaskEvent::Output {
                task_id: event_task,
                chunk,
                ..
            } if event_task == task_id => {
                registry.append_output(task_id, &chunk).await.unwrap();
            }
            TaskEvent::Completed {
                task_id: event_task,
                ..
            } if event_task == task_id => {
                registry.complete_task(task_id, exit_code).await.unwrap();
                return;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn task_completes_and_extracts_structured_result() {
    let reply = "working...\n=== RESULT_OUTPUT ===\nshipped\n=== END_RESULT_OUTPUT ===\n";
    let sdk = ScriptedDriver::new(BackendKind::Sdk, reply);
    let cli = ScriptedDriver::new(BackendKind::Cli, "unused");
    let registry = TaskRegistry::new();
    let (coordinator, mut events) =
        ProcessCoordinator::new(sdk, cli, BackendKind::Sdk, &control());

    let task = registry
        .create_task(NewTask {
            name: "ship it".to_string(),
            description: "do the work".to_string(),
            ..Default::default()
        })
        .await;
    let worker_id = coordinator
        .spawn(spawn_args(&task.id, "do the work"))
        .await
        .unwrap();
    registry.assign_worker(&task.id, &worker_id).await.unwrap();

    drive_to_completion(&registry, &mut events, &task.id, 0).await;

    let done = registry.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Complete);
    assert_eq!(done.exit_code, Some(0));
    assert_eq!(
        done.structured_result,
        Some(serde_json::json!({"result": "shipped"}))
    );
    assert!(done.full_output().contains("working..."));
}

#[tokio::test]
async fn nonzero_exit_reaches_error_with_result_attached() {
    let reply = "=== STRUCTURED_RESULT ===\n{\"partial\": true}\n=== END_STRUCTURED_RESULT ===\n";
    let sdk = ScriptedDriver::new(BackendKind::Sdk, reply);
    let cli = ScriptedDriver::new(BackendKind::Cli, "unused");
    let registry = TaskRegistry::new();
    let (coordinator, mut events) =
        ProcessCoordinator::new(sdk, cli, BackendKind::Sdk, &control());

    let task = registry
        .create_task(NewTask {
            name: "failing".to_string(),
            ..Default::default()
        })
        .await;
    let worker_id = coordinator
        .spawn(spawn_args(&task.id, "try"))
        .await
        .unwrap();
    registry.assign_worker(&task.id, &worker_id).await.unwrap();

    drive_to_completion(&registry, &mut events, &task.id, 1).await;

    let done = registry.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Error);
    assert_eq!(
        done.structured_result,
        Some(serde_json::json!({"partial": true}))
    );
}

#[tokio::test]
async fn completed_task_survives_a_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let reply = "all done\n";
    let sdk = ScriptedDriver::new(BackendKind::Sdk, reply);
    let cli = ScriptedDriver::new(BackendKind::Cli, "unused");
    let registry = TaskRegistry::new();
    let (coordinator, mut events) =
        ProcessCoordinator::new(sdk, cli, BackendKind::Sdk, &control());
    let persistence = PersistenceManager::new(
        dir.path(),
        registry.clone(),
        Duration::from_millis(20),
    );
    persistence.load().await.unwrap();

    let task = registry
        .create_task(NewTask {
            name: "durable".to_string(),
            ..Default::default()
        })
        .await;
    let worker_id = coordinator
        .spawn(spawn_args(&task.id, "persist me"))
        .await
        .unwrap();
    registry.assign_worker(&task.id, &worker_id).await.unwrap();
    drive_to_completion(&registry, &mut events, &task.id, 0).await;
    persistence.flush().await.unwrap();

    let registry2 = TaskRegistry::new();
    let persistence2 = PersistenceManager::new(
        dir.path(),
        registry2.clone(),
        Duration::from_millis(20),
    );
    let report = persistence2.load().await.unwrap();
    assert_eq!(report.active, 1);

    let restored = registry2.get_task(&task.id).await.unwrap();
    assert_eq!(restored.status, TaskStatus::Complete);
    assert_eq!(restored.full_output(), "all done\n");
}
