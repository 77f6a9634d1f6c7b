use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::config::ToolServerConfig;
use crate::util::ChunkRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Coordinator-level handle binding a task to a (session, backend) pair,
/// with locally accumulated output and a status mirror of the task.
#[derive(Clone)]
pub struct Worker {
    pub id: String,
    pub task_id: String,
    pub session_id: String,
    pub backend: BackendKind,
    pub status: WorkerStatus,
    pub output: ChunkRing,
    pub started_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(
        task_id: String,
        session_id: String,
        backend: BackendKind,
        capture_bytes: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id,
            session_id,
            backend,
            status: WorkerStatus::Running,
            output: ChunkRing::new(capture_bytes),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpawnArgs {
    pub task_id: String,
    pub title: String,
    pub prompt: String,
    pub directory: Option<String>,
    /// Provider-specific session mode hint.
    pub mode: Option<String>,
    pub tool_servers: Vec<ToolServerConfig>,
}

/// Task-level events republished by the coordinator for the orchestration
/// layer.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Output {
        task_id: String,
        worker_id: String,
        chunk: String,
    },
    Completed {
        task_id: String,
        worker_id: String,
        content: String,
    },
    Aborted {
        task_id: String,
        worker_id: String,
    },
    Error {
        task_id: String,
        worker_id: String,
        message: String,
    },
    ToolStart {
        task_id: String,
        tool: String,
    },
    ToolEnd {
        task_id: String,
        tool: String,
    },
}
