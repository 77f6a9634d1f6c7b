use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::CodeFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Blocked,
    Complete,
    Error,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Stopped
        )
    }
}

/// A unit of orchestrated work with its own lifecycle and output. Output is
/// append-only and never reordered; the structured result is attached at
/// most once, at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
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
    #[serde(default)]
    pub output: Vec<String>,
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
    /// Derived from output on demand; never persisted.
    #[serde(skip)]
    pub code_files: Option<Vec<CodeFile>>,
}

impl Task {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            parent_id: None,
            dependencies: Vec::new(),
            worker_id: None,
            output: Vec::new(),
            project_dir: None,
            project_name: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            block_reason: None,
            blocked_by: Vec::new(),
            exit_code: None,
            structured_result: None,
            code_files: None,
        }
    }

    pub fn full_output(&self) -> String {
        self.output.join("\n")
    }

    /// Timestamp used by stuck detection: last progress, falling back to
    /// start time when no progress was recorded yet.
    pub fn progress_reference(&self) -> DateTime<Utc> {
        self.last_progress_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }
}

/// Last non-empty path component, e.g. "/home/me/proj/" -> "proj".
pub fn derive_project_name(dir: &str) -> String {
    dir.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(dir)
        .to_string()
}
