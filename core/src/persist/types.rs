use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{Task, TaskStatus};

/// One registry document: the active task list plus archived metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub tasks: Vec<PersistedTask>,
    #[serde(default)]
    pub archived_tasks: Vec<ArchivedTaskMeta>,
}

/// On-disk projection of an active task. Output history lives in a sibling
/// file; the inline `output` field only appears in the legacy layout and is
/// migrated away at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTask {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Legacy inline output (base64). Never written back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub history_size: Option<u64>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_progress_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub structured_result: Option<serde_json::Value>,
}

impl PersistedTask {
    pub fn from_task(task: &Task, history_size: u64) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            status: task.status,
            parent_id: task.parent_id.clone(),
            dependencies: task.dependencies.clone(),
            worker_id: task.worker_id.clone(),
            output: None,
            history_size: Some(history_size),
            project_dir: task.project_dir.clone(),
            project_name: task.project_name.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            last_progress_at: task.last_progress_at,
            block_reason: task.block_reason.clone(),
            blocked_by: task.blocked_by.clone(),
            exit_code: task.exit_code,
            structured_result: task.structured_result.clone(),
        }
    }

    /// Rebuild the in-memory task; `output` is the decoded history, carried
    /// as a single chunk.
    pub fn into_task(self, output: Option<String>) -> Task {
        Task {
            id: self.id,
            name: self.name,
            description: self.description,
            status: self.status,
            parent_id: self.parent_id,
            dependencies: self.dependencies,
            worker_id: self.worker_id,
            output: match output {
                Some(content) if !content.is_empty() => vec![content],
                _ => Vec::new(),
            },
            project_dir: self.project_dir,
            project_name: self.project_name,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_progress_at: self.last_progress_at,
            block_reason: self.block_reason,
            blocked_by: self.blocked_by,
            exit_code: self.exit_code,
            structured_result: self.structured_result,
            code_files: None,
        }
    }
}

/// Archived tasks keep metadata only; their history stays on disk and is
/// loaded on demand. `history_size` may be an approximation when the record
/// was migrated from the legacy inline layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTaskMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    /// Legacy inline output (base64). Only present mid-migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub history_size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub structured_result: Option<serde_json::Value>,
}

impl ArchivedTaskMeta {
    pub fn from_task(task: &Task, history_size: u64) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            status: task.status,
            output: None,
            history_size,
            created_at: task.created_at,
            completed_at: task.completed_at,
            exit_code: task.exit_code,
            structured_result: task.structured_result.clone(),
        }
    }
}
