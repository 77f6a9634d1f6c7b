use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;

use crate::backend::{BackendDriver, BackendEvent, BackendKind};
use crate::config::ToolServerConfig;
use crate::error::GatewayError;

use super::delta::DeltaTracker;
use super::pending::PendingCompletion;
use super::session::{PromptOutcome, SessionHandle, SessionRecord, SessionStatus};

/// Events the gateway relays upward to the coordinator.
#[derive(Debug, Clone)]
pub enum GatewayNotice {
    SessionCreated {
        session_id: String,
        task_id: String,
    },
    Output {
        session_id: String,
        delta: String,
    },
    SessionCompleted {
        session_id: String,
        content: String,
    },
    SessionAborted {
        session_id: String,
    },
    ToolStart {
        session_id: String,
        tool: String,
    },
    ToolEnd {
        session_id: String,
        tool: String,
    },
}

struct GatewayInner {
    driver: Arc<dyn BackendDriver>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    pending: Mutex<HashMap<String, PendingCompletion>>,
    deltas: Mutex<DeltaTracker>,
    roles: Mutex<HashMap<(String, String), String>>,
    notice_tx: mpsc::UnboundedSender<GatewayNotice>,
    prompt_timeout: Duration,
}

/// Abstraction over one backend provider: creates sessions, sends prompts,
/// turns the provider's cumulative event stream into deltas, detects
/// completion via `session.idle`, and auto-resolves permission prompts.
#[derive(Clone)]
pub struct SessionGateway {
    inner: Arc<GatewayInner>,
}

impl SessionGateway {
    pub fn new(
        driver: Arc<dyn BackendDriver>,
        prompt_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let gateway = Self {
            inner: Arc::new(GatewayInner {
                driver,
                sessions: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                deltas: Mutex::new(DeltaTracker::new()),
                roles: Mutex::new(HashMap::new()),
                notice_tx,
                prompt_timeout,
            }),
        };
        (gateway, notice_rx)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.driver.kind()
    }

    /// Start the driver and attach the event dispatch loop. Idempotent; the
    /// driver yields its event stream once per start.
    pub async fn ensure_started(&self) -> Result<(), GatewayError> {
        self.inner.driver.start().await?;
        if let Some(rx) = self.inner.driver.take_events() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                dispatch_loop(inner, rx).await;
            });
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.inner.driver.stop().await;
    }

    pub async fn create(
        &self,
        task_id: &str,
        title: &str,
        directory: Option<&str>,
        mode: Option<&str>,
    ) -> Result<SessionHandle, GatewayError> {
        self.ensure_started().await?;
        let session_id = self
            .inner
            .driver
            .open_session(title, directory, mode)
            .await?;
        let record = SessionRecord::new(
            session_id.clone(),
            self.inner.driver.kind(),
            title.to_string(),
            task_id.to_string(),
        );
        self.inner
            .sessions
            .write()
            .await
            .insert(session_id.clone(), record);
        let _ = self.inner.notice_tx.send(GatewayNotice::SessionCreated {
            session_id: session_id.clone(),
            task_id: task_id.to_string(),
        });
        tracing::info!("session {session_id} created for task {task_id}");
        Ok(SessionHandle {
            session_id,
            task_id: task_id.to_string(),
            backend: self.inner.driver.kind(),
        })
    }

    /// Rebind an existing live session to a new task, preserving
    /// provider-side state across otherwise independent tasks.
    pub async fn adopt_session(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<SessionHandle, GatewayError> {
        if !self.inner.driver.has_session(session_id).await {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(record) => {
                record.task_id = task_id.to_string();
                record.status = SessionStatus::Active;
                record.completed_at = None;
            }
            None => {
                sessions.insert(
                    session_id.to_string(),
                    SessionRecord::new(
                        session_id.to_string(),
                        self.inner.driver.kind(),
                        String::new(),
                        task_id.to_string(),
                    ),
                );
            }
        }
        Ok(SessionHandle {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            backend: self.inner.driver.kind(),
        })
    }

    /// Submit a prompt and await its completion, bounded by the configured
    /// timeout. A second prompt while one is outstanding is rejected. On
    /// timeout the outcome resolves with empty content rather than failing.
    pub async fn send_prompt(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<PromptOutcome, GatewayError> {
        if !self.inner.sessions.read().await.contains_key(session_id) {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }

        let rx = {
            let mut pending = self.inner.pending.lock().await;
            if pending.contains_key(session_id) {
                return Err(GatewayError::PromptInFlight(session_id.to_string()));
            }
            let (completion, rx) = PendingCompletion::new();
            pending.insert(session_id.to_string(), completion);
            rx
        };

        if let Err(e) = self.inner.driver.submit_prompt(session_id, text, false).await {
            self.inner.pending.lock().await.remove(session_id);
            return Ok(PromptOutcome::failed(e.to_string()));
        }

        match timeout(self.inner.prompt_timeout, rx).await {
            Ok(Ok(content)) => Ok(PromptOutcome::ok(content)),
            Ok(Err(_)) => Ok(PromptOutcome::failed(
                "completion channel closed".to_string(),
            )),
            Err(_) => {
                tracing::warn!(
                    "prompt for session {session_id} timed out after {:?}, resolving empty",
                    self.inner.prompt_timeout
                );
                self.inner.pending.lock().await.remove(session_id);
                Ok(PromptOutcome::timed_out())
            }
        }
    }

    /// Fire-and-forget context injection; the provider suppresses any reply.
    pub async fn inject_context(&self, session_id: &str, text: &str) -> Result<(), GatewayError> {
        if !self.inner.sessions.read().await.contains_key(session_id) {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        self.inner.driver.submit_prompt(session_id, text, true).await
    }

    /// Forward user input into a session without registering a completion;
    /// any reply streams into the outstanding completion, if one exists.
    pub async fn send_input(&self, session_id: &str, text: &str) -> Result<(), GatewayError> {
        if !self.inner.sessions.read().await.contains_key(session_id) {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        self.inner.driver.submit_prompt(session_id, text, false).await
    }

    /// Idempotent. Unknown session ids return false without error. A
    /// completion still pending resolves immediately with the deltas
    /// accumulated so far; a late idle event then finds nothing to resolve.
    pub async fn abort_session(&self, session_id: &str) -> bool {
        let state = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get_mut(session_id) {
                Some(record) if record.status == SessionStatus::Aborted => Some(true),
                Some(record) => {
                    record.status = SessionStatus::Aborted;
                    record.completed_at = Some(Utc::now());
                    Some(false)
                }
                None => None,
            }
        };
        match state {
            None => return false,
            Some(true) => return true,
            Some(false) => {}
        }

        if let Err(e) = self.inner.driver.abort(session_id).await {
            tracing::warn!("driver abort failed for {session_id}: {e}");
        }

        if let Some(completion) = self.inner.pending.lock().await.remove(session_id) {
            completion.resolve();
        }
        self.inner.deltas.lock().await.clear_session(session_id);
        self.inner
            .roles
            .lock()
            .await
            .retain(|(sid, _), _| sid != session_id);

        let _ = self.inner.notice_tx.send(GatewayNotice::SessionAborted {
            session_id: session_id.to_string(),
        });
        true
    }

    pub async fn register_tool_server(
        &self,
        session_id: &str,
        server: &ToolServerConfig,
    ) -> Result<(), GatewayError> {
        self.inner
            .driver
            .register_tool_server(session_id, server)
            .await
    }

    pub async fn has_live_session(&self, session_id: &str) -> bool {
        self.inner.driver.has_session(session_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.sessions.read().await.get(session_id).cloned()
    }
}

async fn dispatch_loop(inner: Arc<GatewayInner>, mut rx: mpsc::UnboundedReceiver<BackendEvent>) {
    while let Some(event) = rx.recv().await {
        dispatch(&inner, event).await;
    }
    tracing::debug!("gateway event stream closed");
}

async fn dispatch(inner: &Arc<GatewayInner>, event: BackendEvent) {
    match event {
        BackendEvent::MessageCreated {
            session_id,
            message_id,
            role,
        }
        | BackendEvent::MessageUpdated {
            session_id,
            message_id,
            role,
        } => {
            if !role.is_empty() {
                inner
                    .roles
                    .lock()
                    .await
                    .insert((session_id, message_id), role);
            }
        }

        BackendEvent::PartCreated {
            session_id,
            message_id,
            text,
            ..
        }
        | BackendEvent::PartUpdated {
            session_id,
            message_id,
            text,
            ..
        } => {
            // Only assistant text reaches task output; parts from other
            // roles are provider echo.
            let role = inner
                .roles
                .lock()
                .await
                .get(&(session_id.clone(), message_id.clone()))
                .cloned();
            if matches!(role.as_deref(), Some(r) if r != "assistant") {
                return;
            }

            let delta = inner
                .deltas
                .lock()
                .await
                .delta(&session_id, &message_id, &text);
            if let Some(delta) = delta {
                if let Some(completion) = inner.pending.lock().await.get_mut(&session_id) {
                    completion.push_delta(&delta);
                }
                let _ = inner.notice_tx.send(GatewayNotice::Output {
                    session_id,
                    delta,
                });
            }
        }

        BackendEvent::SessionIdle { session_id } => {
            let completion = inner.pending.lock().await.remove(&session_id);
            let content = match completion {
                Some(completion) => {
                    let content = completion.accumulated();
                    completion.resolve();
                    content
                }
                None => {
                    tracing::debug!("idle for session {session_id} with no pending completion");
                    String::new()
                }
            };

            let mut sessions = inner.sessions.write().await;
            if let Some(record) = sessions.get_mut(&session_id) {
                if record.status == SessionStatus::Active {
                    record.status = SessionStatus::Complete;
                    record.completed_at = Some(Utc::now());
                }
                let _ = inner.notice_tx.send(GatewayNotice::SessionCompleted {
                    session_id,
                    content,
                });
            }
        }

        BackendEvent::PermissionAsked {
            session_id,
            request_id,
        } => {
            if !inner.sessions.read().await.contains_key(&session_id) {
                return;
            }
            if let Err(primary) = inner
                .driver
                .approve_permission(&session_id, &request_id)
                .await
            {
                tracing::warn!(
                    "permission grant failed for {session_id}/{request_id}: {primary}, retrying raw path"
                );
                if let Err(raw) = inner
                    .driver
                    .approve_permission_raw(&session_id, &request_id)
                    .await
                {
                    tracing::warn!(
                        "raw permission grant also failed for {session_id}/{request_id}: {raw}"
                    );
                }
            }
        }

        BackendEvent::PermissionUpdated {
            session_id,
            request_id,
            granted,
        } => {
            tracing::debug!("permission {request_id} on {session_id} updated: granted={granted}");
        }

        BackendEvent::SessionCreated { session_id, .. } => {
            tracing::debug!("provider confirmed session {session_id}");
        }

        BackendEvent::SessionUpdated { session_id, title } => {
            if !title.is_empty() {
                let mut sessions = inner.sessions.write().await;
                if let Some(record) = sessions.get_mut(&session_id) {
                    record.title = title;
                }
            }
        }

        BackendEvent::ToolStart { session_id, tool } => {
            let _ = inner
                .notice_tx
                .send(GatewayNotice::ToolStart { session_id, tool });
        }

        BackendEvent::ToolEnd { session_id, tool } => {
            let _ = inner
                .notice_tx
                .send(GatewayNotice::ToolEnd { session_id, tool });
        }

        BackendEvent::Heartbeat => {}

        BackendEvent::Unknown { event_type } => {
            tracing::debug!("dropping unknown event type: {event_type}");
        }
    }
}
