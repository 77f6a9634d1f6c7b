use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Complete,
    Error,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Gateway-local view of a provider session. The provider that created the
/// session owns its lifecycle; this record only mirrors it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub backend: BackendKind,
    pub status: SessionStatus,
    pub title: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(id: String, backend: BackendKind, title: String, task_id: String) -> Self {
        Self {
            id,
            backend,
            status: SessionStatus::Active,
            title,
            task_id,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub task_id: String,
    pub backend: BackendKind,
}

/// Outcome of a prompt submission. Timeouts resolve successfully with empty
/// content so a task is never left stuck on a silent provider.
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl PromptOutcome {
    pub fn ok(content: String) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            success: true,
            content: Some(String::new()),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error),
        }
    }
}
