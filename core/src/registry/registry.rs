use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::error::RegistryError;
use crate::extract::{extract_code_files, extract_structured_result, CodeFile};

use super::task::{derive_project_name, Task, TaskStatus};
use super::transitions::StatusTransition;

/// Registry state change notifications, best-effort broadcast.
#[derive(Debug, Clone)]
pub enum StateEvent {
    TaskCreated {
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    OutputAppended {
        task_id: String,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
    TaskDeleted {
        task_id: String,
        timestamp: DateTime<Utc>,
    },
}

/// Fields supplied at task creation.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub parent_id: Option<String>,
    pub dependencies: Vec<String>,
    pub project_dir: Option<String>,
}

struct RegistryInner {
    tasks: RwLock<HashMap<String, Task>>,
    event_tx: broadcast::Sender<StateEvent>,
}

/// Owns Task entities and their state machine.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(RegistryInner {
                tasks: RwLock::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.event_tx.subscribe()
    }

    fn emit(&self, event: StateEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    pub async fn create_task(&self, new: NewTask) -> Task {
        let mut task = Task::new(new.name, new.description);
        task.parent_id = new.parent_id;
        task.dependencies = new.dependencies;
        if let Some(dir) = new.project_dir {
            task.project_name = Some(derive_project_name(&dir));
            task.project_dir = Some(dir);
        }

        let snapshot = task.clone();
        self.inner
            .tasks
            .write()
            .await
            .insert(task.id.clone(), task);
        self.emit(StateEvent::TaskCreated {
            task_id: snapshot.id.clone(),
            timestamp: Utc::now(),
        });
        snapshot
    }

    /// Insert a task verbatim, bypassing transition checks. Used when
    /// loading persisted state.
    pub async fn restore_task(&self, task: Task) {
        self.inner
            .tasks
            .write()
            .await
            .insert(task.id.clone(), task);
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.tasks.read().await.get(task_id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), RegistryError> {
        let from = {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            let from = task.status;
            StatusTransition::validate(from, status)?;
            task.status = status;
            match status {
                TaskStatus::Running if task.started_at.is_none() => {
                    task.started_at = Some(Utc::now());
                }
                s if s.is_terminal() => {
                    task.completed_at = Some(Utc::now());
                }
                _ => {}
            }
            from
        };
        self.emit(StateEvent::StatusChanged {
            task_id: task_id.to_string(),
            from,
            to: status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn assign_worker(
        &self,
        task_id: &str,
        worker_id: &str,
    ) -> Result<(), RegistryError> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            StatusTransition::validate(task.status, TaskStatus::Running)?;
            let from = task.status;
            task.status = TaskStatus::Running;
            task.worker_id = Some(worker_id.to_string());
            task.started_at = Some(Utc::now());
            self.emit(StateEvent::StatusChanged {
                task_id: task_id.to_string(),
                from,
                to: TaskStatus::Running,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Append one output chunk and stamp last-progress time.
    pub async fn append_output(&self, task_id: &str, chunk: &str) -> Result<(), RegistryError> {
        let bytes = chunk.len();
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            task.output.push(chunk.to_string());
            task.last_progress_at = Some(Utc::now());
            // Derived records go stale once new output arrives.
            task.code_files = None;
        }
        self.emit(StateEvent::OutputAppended {
            task_id: task_id.to_string(),
            bytes,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Terminal transition: exit 0 completes, anything else errors. Runs the
    /// result extractor over the task's full output and attaches the result
    /// when one is found.
    pub async fn complete_task(
        &self,
        task_id: &str,
        exit_code: i32,
    ) -> Result<Task, RegistryError> {
        let (snapshot, from, to) = {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            let to = if exit_code == 0 {
                TaskStatus::Complete
            } else {
                TaskStatus::Error
            };
            let from = task.status;
            StatusTransition::validate(from, to)?;
            task.status = to;
            task.exit_code = Some(exit_code);
            task.completed_at = Some(Utc::now());
            if task.structured_result.is_none() {
                task.structured_result = extract_structured_result(&task.full_output());
            }
            (task.clone(), from, to)
        };

        self.emit(StateEvent::StatusChanged {
            task_id: task_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
        self.emit(StateEvent::TaskCompleted {
            task_id: task_id.to_string(),
            exit_code,
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Remove a task and, first, every descendant in its sub-task tree.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), RegistryError> {
        let removed = {
            let mut tasks = self.inner.tasks.write().await;
            if !tasks.contains_key(task_id) {
                return Err(RegistryError::TaskNotFound(task_id.to_string()));
            }

            let mut to_remove = vec![task_id.to_string()];
            let mut frontier = vec![task_id.to_string()];
            while let Some(current) = frontier.pop() {
                let children: Vec<String> = tasks
                    .values()
                    .filter(|t| t.parent_id.as_deref() == Some(current.as_str()))
                    .map(|t| t.id.clone())
                    .collect();
                for child in children {
                    if !to_remove.contains(&child) {
                        to_remove.push(child.clone());
                        frontier.push(child);
                    }
                }
            }

            for id in &to_remove {
                tasks.remove(id);
            }
            to_remove
        };

        for id in removed {
            self.emit(StateEvent::TaskDeleted {
                task_id: id,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Remove a single task record without cascading. Used by archival,
    /// which moves the record out of memory rather than discarding work.
    pub async fn remove_task(&self, task_id: &str) -> Option<Task> {
        let removed = self.inner.tasks.write().await.remove(task_id);
        if removed.is_some() {
            self.emit(StateEvent::TaskDeleted {
                task_id: task_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        removed
    }

    pub async fn clear_tasks(&self) {
        self.inner.tasks.write().await.clear();
    }

    pub async fn mark_task_blocked(
        &self,
        task_id: &str,
        reason: &str,
        blocking_ids: Vec<String>,
    ) -> Result<(), RegistryError> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            StatusTransition::validate(task.status, TaskStatus::Blocked)?;
            let from = task.status;
            task.status = TaskStatus::Blocked;
            task.block_reason = Some(reason.to_string());
            task.blocked_by = blocking_ids;
            self.emit(StateEvent::StatusChanged {
                task_id: task_id.to_string(),
                from,
                to: TaskStatus::Blocked,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    pub async fn unblock_task(&self, task_id: &str) -> Result<(), RegistryError> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
            StatusTransition::validate(task.status, TaskStatus::Running)?;
            let from = task.status;
            task.status = TaskStatus::Running;
            task.block_reason = None;
            task.blocked_by.clear();
            self.emit(StateEvent::StatusChanged {
                task_id: task_id.to_string(),
                from,
                to: TaskStatus::Running,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// True iff every listed dependency task is complete. Vacuously true for
    /// an empty list; false when the task or any dependency is unknown.
    pub async fn are_dependencies_met(&self, task_id: &str) -> bool {
        let tasks = self.inner.tasks.read().await;
        let Some(task) = tasks.get(task_id) else {
            return false;
        };
        task.dependencies.iter().all(|dep| {
            tasks
                .get(dep)
                .map(|d| d.status == TaskStatus::Complete)
                .unwrap_or(false)
        })
    }

    pub async fn get_blocked_tasks(&self) -> Vec<Task> {
        self.inner
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Blocked)
            .cloned()
            .collect()
    }

    /// Diagnostic only: running tasks whose last progress (or start time,
    /// if no progress was recorded yet) is older than the threshold. Never
    /// changes task status.
    pub async fn detect_stuck_tasks(&self, timeout: Duration) -> Vec<Task> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        self.inner
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Running && t.progress_reference() < threshold)
            .cloned()
            .collect()
    }

    /// Lazily derive file-change records from the task's output, caching
    /// the result on the task.
    pub async fn code_files(&self, task_id: &str) -> Result<Vec<CodeFile>, RegistryError> {
        let mut tasks = self.inner.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
        if task.code_files.is_none() {
            task.code_files = Some(extract_code_files(&task.full_output()));
        }
        Ok(task.code_files.clone().unwrap_or_default())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
