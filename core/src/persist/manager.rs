use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;

use crate::error::PersistError;
use crate::registry::TaskRegistry;

use super::history::{
    approx_decoded_size, decode_history, read_history, write_history, write_history_encoded,
    HistoryRead,
};
use super::types::{ArchivedTaskMeta, PersistedTask, RegistryDocument};

const REGISTRY_FILE: &str = "tasks.json";
const HISTORY_DIR: &str = "history";
const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub active: usize,
    pub archived: usize,
    pub migrated: usize,
}

enum SaveRequest {
    Debounced,
    Flush(oneshot::Sender<()>),
}

struct PersistInner {
    data_dir: PathBuf,
    registry: TaskRegistry,
    archived: RwLock<Vec<ArchivedTaskMeta>>,
    save_tx: mpsc::UnboundedSender<SaveRequest>,
}

/// Durable storage of task metadata and output history. Saves are debounced
/// in a coalescing window; IO failures are logged and retried by the next
/// scheduled save — in-memory state stays authoritative.
#[derive(Clone)]
pub struct PersistenceManager {
    inner: Arc<PersistInner>,
}

impl PersistenceManager {
    pub fn new(data_dir: impl Into<PathBuf>, registry: TaskRegistry, debounce: Duration) -> Self {
        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PersistInner {
            data_dir: data_dir.into(),
            registry,
            archived: RwLock::new(Vec::new()),
            save_tx,
        });
        tokio::spawn(saver_loop(inner.clone(), save_rx, debounce));
        Self { inner }
    }

    fn registry_path(&self) -> PathBuf {
        self.inner.data_dir.join(REGISTRY_FILE)
    }

    fn history_path(&self, task_id: &str) -> PathBuf {
        self.inner.data_dir.join(HISTORY_DIR).join(format!("{task_id}.txt"))
    }

    fn archive_path(&self, task_id: &str) -> PathBuf {
        self.inner.data_dir.join(ARCHIVE_DIR).join(format!("{task_id}.txt"))
    }

    /// Load the registry document into the registry, performing the
    /// one-time migration of legacy inline-output records into side files.
    pub async fn load(&self) -> Result<LoadReport, PersistError> {
        tokio::fs::create_dir_all(self.inner.data_dir.join(HISTORY_DIR)).await?;
        tokio::fs::create_dir_all(self.inner.data_dir.join(ARCHIVE_DIR)).await?;

        let path = self.registry_path();
        if !path.exists() {
            return Ok(LoadReport::default());
        }

        let text = tokio::fs::read_to_string(&path).await?;
        let document: RegistryDocument =
            serde_json::from_str(&text).map_err(|e| PersistError::Corrupt(e.to_string()))?;

        let mut report = LoadReport::default();

        for mut persisted in document.tasks {
            let output = if let Some(inline) = persisted.output.take() {
                // Legacy layout: inline base64 output moves to a side file
                // and only size metadata stays behind.
                write_history_encoded(&self.history_path(&persisted.id), &inline).await?;
                if persisted.history_size.is_none() {
                    persisted.history_size = Some(approx_decoded_size(inline.len()));
                }
                report.migrated += 1;
                match decode_history(&inline) {
                    Ok(content) => Some(content),
                    Err(e) => {
                        tracing::warn!("history for task {} is undecodable: {e}", persisted.id);
                        None
                    }
                }
            } else {
                match read_history(&self.history_path(&persisted.id), None).await {
                    Ok(read) => Some(read.content),
                    Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        tracing::warn!("history read for task {} failed: {e}", persisted.id);
                        None
                    }
                }
            };
            self.inner
                .registry
                .restore_task(persisted.into_task(output))
                .await;
            report.active += 1;
        }

        let mut archived = Vec::with_capacity(document.archived_tasks.len());
        for mut meta in document.archived_tasks {
            if let Some(inline) = meta.output.take() {
                write_history_encoded(&self.archive_path(&meta.id), &inline).await?;
                if meta.history_size == 0 {
                    meta.history_size = approx_decoded_size(inline.len());
                }
                report.migrated += 1;
            }
            archived.push(meta);
            report.archived += 1;
        }
        *self.inner.archived.write().await = archived;

        if report.migrated > 0 {
            tracing::info!("migrated {} legacy inline-output records", report.migrated);
            self.flush().await?;
        }

        Ok(report)
    }

    /// Request a save; calls within the debounce window coalesce.
    pub fn schedule_save(&self) {
        let _ = self.inner.save_tx.send(SaveRequest::Debounced);
    }

    /// Save immediately, bypassing the debounce window. Shutdown path.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.save_tx.send(SaveRequest::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
            Ok(())
        } else {
            save_now(&self.inner).await
        }
    }

    /// Bounded tail read of an active task's history.
    pub async fn read_task_history(
        &self,
        task_id: &str,
        max: Option<u64>,
    ) -> Result<HistoryRead, PersistError> {
        read_history(&self.history_path(task_id), max).await
    }

    /// On-demand read of an archived task's history; never held in memory.
    pub async fn read_archived_history(
        &self,
        task_id: &str,
        max: Option<u64>,
    ) -> Result<HistoryRead, PersistError> {
        read_history(&self.archive_path(task_id), max).await
    }

    pub async fn archived_tasks(&self) -> Vec<ArchivedTaskMeta> {
        self.inner.archived.read().await.clone()
    }

    /// Move a terminal task out of memory: its history file moves to the
    /// archive directory and only metadata stays in the document.
    pub async fn archive_task(&self, task_id: &str) -> Result<bool, PersistError> {
        let Some(task) = self.inner.registry.get_task(task_id).await else {
            return Ok(false);
        };
        if !task.status.is_terminal() {
            return Ok(false);
        }

        let raw = task.full_output();
        write_history(&self.archive_path(task_id), &raw).await?;
        let _ = tokio::fs::remove_file(self.history_path(task_id)).await;

        self.inner
            .archived
            .write()
            .await
            .push(ArchivedTaskMeta::from_task(&task, raw.len() as u64));
        self.inner.registry.remove_task(task_id).await;
        self.schedule_save();
        Ok(true)
    }

    /// Archive terminal tasks beyond the `keep_recent` most recently
    /// completed. Returns how many were archived.
    pub async fn archive_completed(&self, keep_recent: usize) -> Result<usize, PersistError> {
        let mut terminal: Vec<_> = self
            .inner
            .registry
            .list_tasks()
            .await
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .collect();
        terminal.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

        let mut archived = 0;
        for task in terminal.into_iter().skip(keep_recent) {
            if self.archive_task(&task.id).await? {
                archived += 1;
            }
        }
        Ok(archived)
    }
}

async fn saver_loop(
    inner: Arc<PersistInner>,
    mut rx: mpsc::UnboundedReceiver<SaveRequest>,
    debounce: Duration,
) {
    while let Some(request) = rx.recv().await {
        let mut flush_ack = match request {
            SaveRequest::Flush(ack) => Some(ack),
            SaveRequest::Debounced => None,
        };

        if flush_ack.is_none() {
            // Coalesce further requests inside the debounce window; an
            // explicit flush cuts the window short.
            let deadline = Instant::now() + debounce;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    request = rx.recv() => match request {
                        None => break,
                        Some(SaveRequest::Flush(ack)) => {
                            flush_ack = Some(ack);
                            break;
                        }
                        Some(SaveRequest::Debounced) => continue,
                    },
                }
            }
        }

        if let Err(e) = save_now(&inner).await {
            tracing::warn!("registry save failed (will retry on next save): {e}");
        }
        if let Some(ack) = flush_ack {
            let _ = ack.send(());
        }
    }
}

async fn save_now(inner: &Arc<PersistInner>) -> Result<(), PersistError> {
    let history_dir = inner.data_dir.join(HISTORY_DIR);
    tokio::fs::create_dir_all(&history_dir).await?;
    tokio::fs::create_dir_all(inner.data_dir.join(ARCHIVE_DIR)).await?;

    let tasks = inner.registry.list_tasks().await;
    let mut persisted = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let raw = task.full_output();
        write_history(&history_path_in(&history_dir, &task.id), &raw).await?;
        persisted.push(PersistedTask::from_task(task, raw.len() as u64));
    }

    let document = RegistryDocument {
        tasks: persisted,
        archived_tasks: inner.archived.read().await.clone(),
    };
    let text = serde_json::to_string_pretty(&document)
        .map_err(|e| PersistError::Corrupt(e.to_string()))?;
    tokio::fs::write(inner.data_dir.join(REGISTRY_FILE), text).await?;
    Ok(())
}

fn history_path_in(dir: &Path, task_id: &str) -> PathBuf {
    dir.join(format!("{task_id}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NewTask, Task, TaskStatus};
    use pretty_assertions::assert_eq;

    async fn manager_in(dir: &Path) -> (PersistenceManager, TaskRegistry) {
        let registry = TaskRegistry::new();
        let manager =
            PersistenceManager::new(dir, registry.clone(), Duration::from_millis(20));
        (manager, registry)
    }

    #[tokio::test]
    async fn save_and_reload_round_trips_tasks_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(dir.path()).await;

        let task = registry
            .create_task(NewTask {
                name: "build".to_string(),
                description: "build the thing".to_string(),
                ..Default::default()
            })
            .await;
        registry.assign_worker(&task.id, "w1").await.unwrap();
        registry.append_output(&task.id, "first").await.unwrap();
        registry.append_output(&task.id, "second").await.unwrap();
        manager.flush().await.unwrap();

        let (manager2, registry2) = manager_in(dir.path()).await;
        let report = manager2.load().await.unwrap();
        assert_eq!(report.active, 1);
        assert_eq!(report.migrated, 0);

        let restored = registry2.get_task(&task.id).await.unwrap();
        assert_eq!(restored.name, "build");
        assert_eq!(restored.full_output(), "first\nsecond");
    }

    #[tokio::test]
    async fn legacy_inline_output_migrates_to_side_file() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let dir = tempfile::tempdir().unwrap();
        let inline = STANDARD.encode("legacy output of task one");
        let inline_len = inline.len();
        let document = serde_json::json!({
            "tasks": [],
            "archived_tasks": [{
                "id": "old-1",
                "name": "old",
                "description": "",
                "status": "complete",
                "output": inline,
                "created_at": "2025-01-01T00:00:00Z",
            }],
        });
        tokio::fs::write(
            dir.path().join(REGISTRY_FILE),
            serde_json::to_string(&document).unwrap(),
        )
        .await
        .unwrap();

        let (manager, _registry) = manager_in(dir.path()).await;
        let report = manager.load().await.unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.migrated, 1);

        let archived = manager.archived_tasks().await;
        assert_eq!(archived[0].history_size, (inline_len as u64 * 3) / 4);
        assert!(archived[0].output.is_none());

        let history = manager.read_archived_history("old-1", None).await.unwrap();
        assert_eq!(history.content, "legacy output of task one");

        // Migration is one-time: the rewritten document has no inline field.
        let rewritten = tokio::fs::read_to_string(dir.path().join(REGISTRY_FILE))
            .await
            .unwrap();
        assert!(!rewritten.contains("legacy output"));
        let reparsed: RegistryDocument = serde_json::from_str(&rewritten).unwrap();
        assert!(reparsed.archived_tasks[0].output.is_none());
    }

    #[tokio::test]
    async fn archive_moves_terminal_task_out_of_memory() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(dir.path()).await;
        manager.load().await.unwrap();

        let task = registry
            .create_task(NewTask {
                name: "done soon".to_string(),
                ..Default::default()
            })
            .await;
        registry.assign_worker(&task.id, "w").await.unwrap();
        registry.append_output(&task.id, "the work").await.unwrap();
        registry.complete_task(&task.id, 0).await.unwrap();

        assert!(manager.archive_task(&task.id).await.unwrap());
        assert!(registry.get_task(&task.id).await.is_none());

        let archived = manager.archived_tasks().await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].history_size, "the work".len() as u64);

        let history = manager.read_archived_history(&task.id, None).await.unwrap();
        assert_eq!(history.content, "the work");
    }

    #[tokio::test]
    async fn running_tasks_are_not_archivable() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(dir.path()).await;
        manager.load().await.unwrap();

        let task = registry
            .create_task(NewTask {
                name: "busy".to_string(),
                ..Default::default()
            })
            .await;
        registry.assign_worker(&task.id, "w").await.unwrap();
        assert!(!manager.archive_task(&task.id).await.unwrap());
        assert!(registry.get_task(&task.id).await.is_some());
    }

    #[tokio::test]
    async fn archive_completed_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(dir.path()).await;
        manager.load().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let mut task = Task::new(format!("t{i}"), "");
            task.status = TaskStatus::Complete;
            task.completed_at =
                Some(chrono::Utc::now() - chrono::Duration::seconds(100 - i as i64));
            ids.push(task.id.clone());
            registry.restore_task(task).await;
        }

        let archived = manager.archive_completed(1).await.unwrap();
        assert_eq!(archived, 2);
        // The most recently completed task stays live.
        assert!(registry.get_task(&ids[2]).await.is_some());
        assert!(registry.get_task(&ids[0]).await.is_none());
        assert!(registry.get_task(&ids[1]).await.is_none());
    }

    #[tokio::test]
    async fn debounced_saves_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(dir.path()).await;
        manager.load().await.unwrap();

        registry
            .create_task(NewTask {
                name: "t".to_string(),
                ..Default::default()
            })
            .await;
        for _ in 0..20 {
            manager.schedule_save();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let text = tokio::fs::read_to_string(dir.path().join(REGISTRY_FILE))
            .await
            .unwrap();
        let document: RegistryDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(document.tasks.len(), 1);
    }
}
