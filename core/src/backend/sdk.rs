use std::collections::HashSet;
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

/// SDK-driven provider: one persistent child process serving many sessions,
/// multiplexed over a single event stream.
pub struct SdkDriver {
    cfg: BackendProcessConfig,
    running: AtomicBool,
    process: Mutex<Option<ProviderProcess>>,
    events_slot: std::sync::Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
    sessions: Mutex<HashSet<String>>,
}

impl SdkDriver {
    pub fn new(cfg: BackendProcessConfig) -> Self {
        Self {
            cfg,
            running: AtomicBool::new(false),
            process: Mutex::new(None),
            events_slot: std::sync::Mutex::new(None),
            sessions: Mutex::new(HashSet::new()),
        }
    }

    async fn write_control_line(&self, line: &str) -> Result<(), GatewayError> {
        let mut guard = self.process.lock().await;
        let process = guard
            .as_mut()
            .ok_or_else(|| GatewayError::Backend("sdk provider not running".to_string()))?;
        write_line(&mut process.stdin, line).await
    }

    fn new_session_id() -> String {
        format!(
            "ses-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().to_string()[..8]
        )
    }
}

#[async_trait]
impl BackendDriver for SdkDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Sdk
    }

    async fn start(&self) -> Result<(), GatewayError> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let spawned = spawn_provider(&self.cfg.command, &self.cfg.args, None)?;
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_event_pump(spawned.stdout, tx, None, "sdk");
        spawn_stderr_pump(spawned.stderr, "sdk");

        *self.events_slot.lock().unwrap() = Some(rx);
        *guard = Some(spawned.process);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("sdk provider started: {}", self.cfg.command);
        Ok(())
    }

    async fn stop(&self) {
        let mut guard = self.process.lock().await;
        if let Some(mut process) = guard.take() {
            let _ = process.child.start_kill();
            tracing::info!("sdk provider stopped");
        }
        self.sessions.lock().await.clear();
        self.running.store(false, Ordering::SeqCst);
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
        let session_id = Self::new_session_id();
        let cmd = SessionOpenCmd::new(
            session_id.clone(),
            title.to_string(),
            directory.map(str::to_string),
            mode.map(str::to_string),
        );
        self.write_control_line(&to_line(&cmd)).await?;
        self.sessions.lock().await.insert(session_id.clone());
        Ok(session_id)
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains(session_id)
    }

    async fn submit_prompt(
        &self,
        session_id: &str,
        text: &str,
        quiet: bool,
    ) -> Result<(), GatewayError> {
        if !self.has_session(session_id).await {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        let cmd = PromptCmd::new(session_id.to_string(), text.to_string(), quiet);
        self.write_control_line(&to_line(&cmd)).await
    }

    async fn abort(&self, session_id: &str) -> Result<bool, GatewayError> {
        if !self.sessions.lock().await.remove(session_id) {
            return Ok(false);
        }
        let cmd = SessionAbortCmd::new(session_id.to_string(), "aborted by caller".to_string());
        if let Err(e) = self.write_control_line(&to_line(&cmd)).await {
            tracing::warn!("abort control line failed for {session_id}: {e}");
        }
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
        self.write_control_line(&to_line(&cmd)).await
    }

    async fn approve_permission(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError> {
        let cmd = PermissionGrantCmd::new(session_id.to_string(), request_id.to_string());
        self.write_control_line(&to_line(&cmd)).await
    }

    async fn approve_permission_raw(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError> {
        let cmd = PermissionRespondCmd::new(session_id.to_string(), request_id.to_string());
        self.write_control_line(&to_line(&cmd)).await
    }
}
