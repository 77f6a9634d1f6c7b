use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use taskmux_core::api::{
    BackendDriver, BackendEvent, BackendKind, GatewayError, ToolServerConfig,
};

/// Provider stand-in that answers every prompt with a scripted reply,
/// streamed as growing cumulative payloads followed by an idle event.
pub struct ScriptedDriver {
    kind: BackendKind,
    reply: String,
    counter: AtomicUsize,
    event_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<BackendEvent>>>,
    events_slot: std::sync::Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
    sessions: std::sync::Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new(kind: BackendKind, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: reply.to_string(),
            counter: AtomicUsize::new(0),
            event_tx: std::sync::Mutex::new(None),
            events_slot: std::sync::Mutex::new(None),
            sessions: std::sync::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BackendDriver for ScriptedDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(&self) -> Result<(), GatewayError> {
        if self.event_tx.lock().unwrap().is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.event_tx.lock().unwrap() = Some(tx);
            *self.events_slot.lock().unwrap() = Some(rx);
        }
        Ok(())
    }

    async fn stop(&self) {
        *self.event_tx.lock().unwrap() = None;
        self.sessions.lock().unwrap().clear();
    }

    fn is_running(&self) -> bool {
        self.event_tx.lock().unwrap().is_some()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events_slot.lock().unwrap().take()
    }

    async fn open_session(
        &self,
        _title: &str,
        _directory: Option<&str>,
        _mode: Option<&str>,
    ) -> Result<String, GatewayError> {
        let id = format!("scripted-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == session_id)
    }

    async fn submit_prompt(
        &self,
        session_id: &str,
        _text: &str,
        quiet: bool,
    ) -> Result<(), GatewayError> {
        if quiet {
            return Ok(());
        }
        let tx = self.event_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let message_id = format!("m-{}", uuid::Uuid::new_v4());
            // Cumulative payloads: each event repeats everything so far.
            let mut cumulative = String::new();
            for line in self.reply.split_inclusive('\n') {
                cumulative.push_str(line);
                let _ = tx.send(BackendEvent::PartUpdated {
                    session_id: session_id.to_string(),
                    message_id: message_id.clone(),
                    part_id: "p".to_string(),
                    text: cumulative.clone(),
                });
            }
            let _ = tx.send(BackendEvent::SessionIdle {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<bool, GatewayError> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s != session_id);
        Ok(sessions.len() != before)
    }

    async fn register_tool_server(
        &self,
        _session_id: &str,
        _server: &ToolServerConfig,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn approve_permission(
        &self,
        _session_id: &str,
        _request_id: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn approve_permission_raw(
        &self,
        _session_id: &str,
        _request_id: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}
