use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::config::{BackendProcessConfig, ToolServerConfig};
use crate::error::GatewayError;

use super::process::{spawn_provider, write_line, ProviderProcess};
use super::protocol::{
    to_line, PermissionGrantCmd, PermissionRespondCmd, PromptCmd, SessionAbortCmd, SessionOpenCmd,
    ToolServerRegisterCmd,
};
use super::pump::{spawn_event_pump, spawn_stderr_pump};
use super::{BackendDriver, BackendEvent, BackendKind};

/// CLI-driven provider: one child process per session. Events from every
/// child merge into a single stream; children that omit `session_id` on the
/// wire are attributed by the pump's per-process default.
pub struct CliDriver {
    cfg: BackendProcessConfig,
    running: AtomicBool,
    event_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<BackendEvent>>>,
    events_slot: std::sync::Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
    sessions: Mutex<HashMap<String, ProviderProcess>>,
}

impl CliDriver {
    pub fn new(cfg: BackendProcessConfig) -> Self {
        Self {
            cfg,
            running: AtomicBool::new(false),
            event_tx: std::sync::Mutex::new(None),
            events_slot: std::sync::Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn new_session_id() -> String {
        format!(
            "cli-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().to_string()[..8]
        )
    }

    async fn write_session_line(&self, session_id: &str, line: &str) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.lock().await;
        let process = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
        write_line(&mut process.stdin, line).await
    }
}

#[async_trait]
impl BackendDriver for CliDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Cli
    }

    async fn start(&self) -> Result<(), GatewayError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.event_tx.lock().unwrap() = Some(tx);
        *self.events_slot.lock().unwrap() = Some(rx);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("cli provider ready: {}", self.cfg.command);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut sessions = self.sessions.lock().await;
        for (session_id, mut process) in sessions.drain() {
            if process.child.start_kill().is_err() {
                tracing::debug!("cli session {session_id} already exited");
            }
        }
        *self.event_tx.lock().unwrap() = None;
        tracing::info!("cli provider stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>> {
        self.events_slot.lock().unwrap().take()
    }

    async fn open_session(
        &self,
        title: &str,
        directory: Option<&str>,
        mode: Option<&str>,
    ) -> Result<String, GatewayError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(GatewayError::Backend("cli provider not started".to_string()));
        }
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::Backend("cli provider not started".to_string()))?;

        let session_id = Self::new_session_id();
        let mut spawned = spawn_provider(&self.cfg.command, &self.cfg.args, directory)?;
        spawn_event_pump(spawned.stdout, tx, Some(session_id.clone()), "cli");
        spawn_stderr_pump(spawned.stderr, "cli");

        let open = SessionOpenCmd::new(
            session_id.clone(),
            title.to_string(),
            directory.map(str::to_string),
            mode.map(str::to_string),
        );
        write_line(&mut spawned.process.stdin, &to_line(&open)).await?;

        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), spawned.process);
        Ok(session_id)
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    async fn submit_prompt(
        &self,
        session_id: &str,
        text: &str,
        quiet: bool,
    ) -> Result<(), GatewayError> {
        let cmd = PromptCmd::new(session_id.to_string(), text.to_string(), quiet);
        self.write_session_line(session_id, &to_line(&cmd)).await
    }

    async fn abort(&self, session_id: &str) -> Result<bool, GatewayError> {
        let mut sessions = self.sessions.lock().await;
        let Some(mut process) = sessions.remove(session_id) else {
            return Ok(false);
        };
        drop(sessions);

        let cmd = SessionAbortCmd::new(session_id.to_string(), "aborted by caller".to_string());
        if write_line(&mut process.stdin, &to_line(&cmd)).await.is_err() {
            tracing::debug!("cli session {session_id} stdin already closed");
        }
        let _ = process.child.start_kill();
        Ok(true)
    }

    async fn register_tool_server(
        &self,
        session_id: &str,
        server: &ToolServerConfig,
    ) -> Result<(), GatewayError> {
        let cmd = ToolServerRegisterCmd::new(
            session_id.to_string(),
            server.name.clone(),
            server.command.clone(),
            server.args.clone(),
        );
        self.write_session_line(session_id, &to_line(&cmd)).await
    }

    async fn approve_permission(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError> {
        let cmd = PermissionGrantCmd::new(session_id.to_string(), request_id.to_string());
        self.write_session_line(session_id, &to_line(&cmd)).await
    }

    async fn approve_permission_raw(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError> {
        let cmd = PermissionRespondCmd::new(session_id.to_string(), request_id.to_string());
        self.write_session_line(session_id, &to_line(&cmd)).await
    }
}
