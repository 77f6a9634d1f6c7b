//! Optional JSONL audit stream of task-level events.

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::EventsOutConfig;
use crate::coordinator::TaskEvent;

/// One audit line. Chunk payloads are size-only; full output already lives
/// in task history.
#[derive(Debug, Serialize)]
pub struct TaskEventRecord {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskEventRecord {
    pub fn from_event(event: &TaskEvent) -> Self {
        let ts = chrono::Utc::now().to_rfc3339();
        match event {
            TaskEvent::Output {
                task_id, worker_id, chunk,
            } => Self {
                v: 1,
                ty: "task.output",
                ts,
                task_id: task_id.clone(),
                worker_id: Some(worker_id.clone()),
                bytes: Some(chunk.len()),
                tool: None,
                message: None,
            },
            TaskEvent::Completed {
                task_id, worker_id, ..
            } => Self {
                v: 1,
                ty: "task.completed",
                ts,
                task_id: task_id.clone(),
                worker_id: Some(worker_id.clone()),
                bytes: None,
                tool: None,
                message: None,
            },
            TaskEvent::Aborted { task_id, worker_id } => Self {
                v: 1,
                ty: "task.aborted",
                ts,
                task_id: task_id.clone(),
                worker_id: Some(worker_id.clone()),
                bytes: None,
                tool: None,
                message: None,
            },
            TaskEvent::Error {
                task_id, worker_id, message,
            } => Self {
                v: 1,
                ty: "task.error",
                ts,
                task_id: task_id.clone(),
                worker_id: Some(worker_id.clone()),
                bytes: None,
                tool: None,
                message: Some(message.clone()),
            },
            TaskEvent::ToolStart { task_id, tool } => Self {
                v: 1,
                ty: "task.tool.start",
                ts,
                task_id: task_id.clone(),
                worker_id: None,
                bytes: None,
                tool: Some(tool.clone()),
                message: None,
            },
            TaskEvent::ToolEnd { task_id, tool } => Self {
                v: 1,
                ty: "task.tool.end",
                ts,
                task_id: task_id.clone(),
                worker_id: None,
                bytes: None,
                tool: Some(tool.clone()),
                message: None,
            },
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<String>,
    dropped: std::sync::Arc<std::sync::atomic::AtomicU64>,
    drop_when_full: bool,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn send_event(&self, event: &TaskEvent) {
        self.send_line(TaskEventRecord::from_event(event).to_line())
            .await;
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            if self.tx.try_send(line).is_err() {
                self.dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        } else if self.tx.send(line).await.is_err() {
            // writer closed
        }
    }
}

pub async fn start_events_out(cfg: &EventsOutConfig) -> Result<Option<EventsOutTx>, String> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity);
    let dropped = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let path = cfg.path.clone();
    let drop_when_full = cfg.drop_when_full;

    tokio::spawn(async move {
        let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if path == "stdout:" {
            Box::new(tokio::io::stdout())
        } else {
            let file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("events out file {path} unavailable: {e}");
                    return;
                }
            };
            Box::new(file)
        };

        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if writer.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }

        let _ = writer.flush().await;
    });

    Ok(Some(EventsOutTx {
        tx,
        dropped,
        drop_when_full,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let cfg = EventsOutConfig {
            enabled: true,
            path: path.to_string_lossy().to_string(),
            channel_capacity: 16,
            drop_when_full: true,
        };
        let tx = start_events_out(&cfg).await.unwrap().unwrap();

        tx.send_event(&TaskEvent::Output {
            task_id: "t1".to_string(),
            worker_id: "w1".to_string(),
            chunk: "hello".to_string(),
        })
        .await;
        tx.send_event(&TaskEvent::Completed {
            task_id: "t1".to_string(),
            worker_id: "w1".to_string(),
            content: "hello".to_string(),
        })
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "task.output");
        assert_eq!(first["bytes"], 5);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "task.completed");
    }

    #[tokio::test]
    async fn disabled_config_yields_no_writer() {
        let cfg = EventsOutConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(start_events_out(&cfg).await.unwrap().is_none());
    }
}
