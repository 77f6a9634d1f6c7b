use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::backend::{BackendDriver, BackendKind};
use crate::config::ControlConfig;
use crate::error::CoordinatorError;
use crate::gateway::{GatewayNotice, SessionGateway};

use super::types::{SpawnArgs, TaskEvent, Worker, WorkerStatus};

struct CoordinatorInner {
    gateways: HashMap<BackendKind, SessionGateway>,
    active: RwLock<BackendKind>,
    workers: RwLock<HashMap<String, Worker>>,
    /// session id -> worker id
    session_index: RwLock<HashMap<String, String>>,
    /// Most recent (session id, worker id) pair eligible for reuse.
    last_resumable: Mutex<Option<(String, String)>>,
    event_tx: mpsc::UnboundedSender<TaskEvent>,
    capture_bytes: usize,
}

/// Maps opaque worker identities to (session, backend) pairs, dispatches
/// gateway events to task-level events, and supports backend hot-swap and
/// cross-task session reuse.
#[derive(Clone)]
pub struct ProcessCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ProcessCoordinator {
    pub fn new(
        sdk_driver: Arc<dyn BackendDriver>,
        cli_driver: Arc<dyn BackendDriver>,
        active: BackendKind,
        control: &ControlConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let prompt_timeout = Duration::from_millis(control.prompt_timeout_ms);
        let (sdk_gateway, sdk_notices) = SessionGateway::new(sdk_driver, prompt_timeout);
        let (cli_gateway, cli_notices) = SessionGateway::new(cli_driver, prompt_timeout);

        let mut gateways = HashMap::new();
        gateways.insert(BackendKind::Sdk, sdk_gateway);
        gateways.insert(BackendKind::Cli, cli_gateway);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(CoordinatorInner {
            gateways,
            active: RwLock::new(active),
            workers: RwLock::new(HashMap::new()),
            session_index: RwLock::new(HashMap::new()),
            last_resumable: Mutex::new(None),
            event_tx,
            capture_bytes: control.capture_bytes,
        });

        tokio::spawn(relay_loop(inner.clone(), sdk_notices));
        tokio::spawn(relay_loop(inner.clone(), cli_notices));

        (Self { inner }, event_rx)
    }

    pub async fn backend_kind(&self) -> BackendKind {
        *self.inner.active.read().await
    }

    async fn active_gateway(&self) -> (BackendKind, SessionGateway) {
        let kind = *self.inner.active.read().await;
        (kind, self.gateway_for(kind))
    }

    fn gateway_for(&self, kind: BackendKind) -> SessionGateway {
        // Both kinds are inserted at construction.
        self.inner.gateways[&kind].clone()
    }

    /// Spawn a worker: ensure the active provider is started, create a
    /// session, register auxiliary tool servers, optionally inject
    /// directory context, and dispatch the prompt asynchronously.
    pub async fn spawn(&self, args: SpawnArgs) -> Result<String, CoordinatorError> {
        let (kind, gateway) = self.active_gateway().await;
        gateway
            .ensure_started()
            .await
            .map_err(|e| CoordinatorError::BackendStart(e.to_string()))?;

        let handle = gateway
            .create(
                &args.task_id,
                &args.title,
                args.directory.as_deref(),
                args.mode.as_deref(),
            )
            .await?;

        for server in &args.tool_servers {
            if let Err(e) = gateway
                .register_tool_server(&handle.session_id, server)
                .await
            {
                tracing::warn!("tool server {} registration failed: {e}", server.name);
            }
        }

        if let Some(dir) = &args.directory {
            if let Err(e) = gateway
                .inject_context(&handle.session_id, &format!("Working directory: {dir}"))
                .await
            {
                tracing::warn!("directory context injection failed: {e}");
            }
        }

        let worker_id = self
            .register_worker(&args.task_id, &handle.session_id, kind)
            .await;
        self.dispatch_prompt(gateway, &handle.session_id, &worker_id, &args);
        Ok(worker_id)
    }

    /// Spawn against the most recently remembered session to preserve
    /// provider-side state across tasks. Falls back transparently to a
    /// fresh spawn when the remembered session is no longer live.
    pub async fn spawn_with_resume(&self, args: SpawnArgs) -> Result<String, CoordinatorError> {
        let (kind, gateway) = self.active_gateway().await;
        gateway
            .ensure_started()
            .await
            .map_err(|e| CoordinatorError::BackendStart(e.to_string()))?;

        let remembered = self.inner.last_resumable.lock().await.clone();
        if let Some((session_id, _)) = remembered {
            if gateway.has_live_session(&session_id).await {
                match gateway.adopt_session(&session_id, &args.task_id).await {
                    Ok(handle) => {
                        let worker_id = self
                            .register_worker(&args.task_id, &handle.session_id, kind)
                            .await;
                        self.dispatch_prompt(gateway, &handle.session_id, &worker_id, &args);
                        return Ok(worker_id);
                    }
                    Err(e) => {
                        tracing::info!("session {session_id} could not be adopted ({e}), spawning fresh");
                    }
                }
            } else {
                tracing::info!("remembered session {session_id} is gone, spawning fresh");
            }
        }

        self.spawn(args).await
    }

    async fn register_worker(
        &self,
        task_id: &str,
        session_id: &str,
        kind: BackendKind,
    ) -> String {
        let worker = Worker::new(
            task_id.to_string(),
            session_id.to_string(),
            kind,
            self.inner.capture_bytes,
        );
        let worker_id = worker.id.clone();
        self.inner
            .workers
            .write()
            .await
            .insert(worker_id.clone(), worker);
        self.inner
            .session_index
            .write()
            .await
            .insert(session_id.to_string(), worker_id.clone());
        *self.inner.last_resumable.lock().await =
            Some((session_id.to_string(), worker_id.clone()));
        worker_id
    }

    fn dispatch_prompt(
        &self,
        gateway: SessionGateway,
        session_id: &str,
        worker_id: &str,
        args: &SpawnArgs,
    ) {
        let inner = self.inner.clone();
        let session_id = session_id.to_string();
        let worker_id = worker_id.to_string();
        let task_id = args.task_id.clone();
        let prompt = args.prompt.clone();
        tokio::spawn(async move {
            let failure = match gateway.send_prompt(&session_id, &prompt).await {
                Ok(outcome) if outcome.success => None,
                Ok(outcome) => Some(outcome.error.unwrap_or_else(|| "prompt failed".to_string())),
                Err(e) => Some(e.to_string()),
            };
            if let Some(message) = failure {
                tracing::warn!("prompt dispatch for task {task_id} failed: {message}");
                if let Some(worker) = inner.workers.write().await.get_mut(&worker_id) {
                    worker.status = WorkerStatus::Failed;
                }
                let _ = inner.event_tx.send(TaskEvent::Error {
                    task_id,
                    worker_id,
                    message,
                });
            }
        });
    }

    /// Abort the worker's session. Unknown worker ids return false.
    pub async fn kill(&self, worker_id: &str) -> bool {
        let Some((session_id, backend)) = self
            .inner
            .workers
            .read()
            .await
            .get(worker_id)
            .map(|w| (w.session_id.clone(), w.backend))
        else {
            return false;
        };
        self.gateway_for(backend).abort_session(&session_id).await
    }

    /// Forward user input to the worker's session, e.g. to answer a
    /// waiting-state question.
    pub async fn send_input(&self, worker_id: &str, text: &str) -> Result<(), CoordinatorError> {
        let (session_id, backend) = self
            .inner
            .workers
            .read()
            .await
            .get(worker_id)
            .map(|w| (w.session_id.clone(), w.backend))
            .ok_or_else(|| CoordinatorError::WorkerNotFound(worker_id.to_string()))?;
        self.gateway_for(backend)
            .send_input(&session_id, text)
            .await?;
        Ok(())
    }

    pub async fn get_output(&self, worker_id: &str) -> Option<String> {
        self.inner
            .workers
            .read()
            .await
            .get(worker_id)
            .map(|w| w.output.to_string_lossy())
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<Worker> {
        self.inner.workers.read().await.get(worker_id).cloned()
    }

    /// Drop all non-running worker records. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut workers = self.inner.workers.write().await;
        let mut index = self.inner.session_index.write().await;
        let stale: Vec<String> = workers
            .iter()
            .filter(|(_, w)| w.status != WorkerStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        for worker_id in &stale {
            if let Some(worker) = workers.remove(worker_id) {
                if index.get(&worker.session_id) == Some(worker_id) {
                    index.remove(&worker.session_id);
                }
            }
        }
        stale.len()
    }

    /// Backend hot-swap: stop both providers, start the newly selected one,
    /// and swap the active kind. Existing worker bookkeeping is untouched.
    pub async fn set_backend(&self, kind: BackendKind) -> Result<(), CoordinatorError> {
        let mut active = self.inner.active.write().await;
        join_all(self.inner.gateways.values().map(|g| g.stop())).await;
        self.gateway_for(kind)
            .ensure_started()
            .await
            .map_err(|e| CoordinatorError::BackendStart(e.to_string()))?;
        *active = kind;
        tracing::info!("active backend swapped to {kind}");
        Ok(())
    }
}

async fn relay_loop(
    inner: Arc<CoordinatorInner>,
    mut notices: mpsc::UnboundedReceiver<GatewayNotice>,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            GatewayNotice::SessionCreated {
                session_id,
                task_id,
            } => {
                tracing::debug!("session {session_id} created for task {task_id}");
            }

            GatewayNotice::Output { session_id, delta } => {
                let lookup = lookup_worker(&inner, &session_id).await;
                if let Some((worker_id, task_id, ring)) = lookup {
                    ring.push(delta.as_bytes());
                    let _ = inner.event_tx.send(TaskEvent::Output {
                        task_id,
                        worker_id,
                        chunk: delta,
                    });
                }
            }

            GatewayNotice::SessionCompleted {
                session_id,
                content,
            } => {
                if let Some(worker_id) = inner.session_index.read().await.get(&session_id).cloned()
                {
                    let mut workers = inner.workers.write().await;
                    if let Some(worker) = workers.get_mut(&worker_id) {
                        worker.status = WorkerStatus::Completed;
                        let _ = inner.event_tx.send(TaskEvent::Completed {
                            task_id: worker.task_id.clone(),
                            worker_id: worker_id.clone(),
                            content,
                        });
                    }
                }
            }

            GatewayNotice::SessionAborted { session_id } => {
                if let Some(worker_id) = inner.session_index.read().await.get(&session_id).cloned()
                {
                    let mut workers = inner.workers.write().await;
                    if let Some(worker) = workers.get_mut(&worker_id) {
                        worker.status = WorkerStatus::Stopped;
                        let _ = inner.event_tx.send(TaskEvent::Aborted {
                            task_id: worker.task_id.clone(),
                            worker_id: worker_id.clone(),
                        });
                    }
                }
            }

            GatewayNotice::ToolStart { session_id, tool } => {
                if let Some((_, task_id, _)) = lookup_worker(&inner, &session_id).await {
                    let _ = inner.event_tx.send(TaskEvent::ToolStart { task_id, tool });
                }
            }

            GatewayNotice::ToolEnd { session_id, tool } => {
                if let Some((_, task_id, _)) = lookup_worker(&inner, &session_id).await {
                    let _ = inner.event_tx.send(TaskEvent::ToolEnd { task_id, tool });
                }
            }
        }
    }
}

async fn lookup_worker(
    inner: &Arc<CoordinatorInner>,
    session_id: &str,
) -> Option<(String, String, crate::util::ChunkRing)> {
    let worker_id = inner.session_index.read().await.get(session_id).cloned()?;
    let workers = inner.workers.read().await;
    let worker = workers.get(&worker_id)?;
    Some((
        worker_id,
        worker.task_id.clone(),
        worker.output.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendEvent;
    use crate::config::ToolServerConfig;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: replies to every prompt with streamed text
    /// followed by an idle event.
    struct FakeDriver {
        kind: BackendKind,
        reply: String,
        counter: AtomicUsize,
        event_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<BackendEvent>>>,
        events_slot: std::sync::Mutex<Option<mpsc::UnboundedReceiver<BackendEvent>>>,
        sessions: std::sync::Mutex<Vec<String>>,
        prompts: std::sync::Mutex<Vec<(String, String, bool)>>,
    }

    impl FakeDriver {
        fn new(kind: BackendKind, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                reply: reply.to_string(),
                counter: AtomicUsize::new(0),
                event_tx: std::sync::Mutex::new(None),
                events_slot: std::sync::Mutex::new(None),
                sessions: std::sync::Mutex::new(Vec::new()),
                prompts: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn drop_sessions(&self) {
            self.sessions.lock().unwrap().clear();
        }

        fn session_count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BackendDriver for FakeDriver {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn start(&self) -> Result<(), GatewayError> {
            let mut slot = self.events_slot.lock().unwrap();
            if self.event_tx.lock().unwrap().is_none() {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.event_tx.lock().unwrap() = Some(tx);
                *slot = Some(rx);
            }
            Ok(())
        }

        async fn stop(&self) {
            *self.event_tx.lock().unwrap() = None;
            self.drop_sessions();
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
            let id = format!(
                "{}-{}",
                self.kind,
                self.counter.fetch_add(1, Ordering::SeqCst)
            );
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
            text: &str,
            quiet: bool,
        ) -> Result<(), GatewayError> {
            self.prompts
                .lock()
                .unwrap()
                .push((session_id.to_string(), text.to_string(), quiet));
            if quiet {
                return Ok(());
            }
            let tx = self.event_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx.send(BackendEvent::PartUpdated {
                    session_id: session_id.to_string(),
                    message_id: format!("m-{}", self.counter.load(Ordering::SeqCst)),
                    part_id: "p".to_string(),
                    text: self.reply.clone(),
                });
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

    fn test_control() -> ControlConfig {
        ControlConfig {
            prompt_timeout_ms: 2_000,
            capture_bytes: 4096,
            stuck_timeout_ms: 60_000,
        }
    }

    fn spawn_args(task_id: &str) -> SpawnArgs {
        SpawnArgs {
            task_id: task_id.to_string(),
            title: "test".to_string(),
            prompt: "go".to_string(),
            ..Default::default()
        }
    }

    async fn collect_until_completed(
        events: &mut mpsc::UnboundedReceiver<TaskEvent>,
    ) -> (Vec<String>, String) {
        let mut chunks = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event expected")
                .expect("channel open");
            match event {
                TaskEvent::Output { chunk, .. } => chunks.push(chunk),
                TaskEvent::Completed { content, .. } => return (chunks, content),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn spawn_relays_output_and_completion() {
        let sdk = FakeDriver::new(BackendKind::Sdk, "done!");
        let cli = FakeDriver::new(BackendKind::Cli, "unused");
        let (coordinator, mut events) =
            ProcessCoordinator::new(sdk, cli, BackendKind::Sdk, &test_control());

        let worker_id = coordinator.spawn(spawn_args("task-1")).await.unwrap();
        let (chunks, content) = collect_until_completed(&mut events).await;
        assert_eq!(chunks, vec!["done!"]);
        assert_eq!(content, "done!");

        let worker = coordinator.get_worker(&worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Completed);
        assert_eq!(
            coordinator.get_output(&worker_id).await.as_deref(),
            Some("done!")
        );
    }

    #[tokio::test]
    async fn resume_reuses_live_session() {
        let sdk = FakeDriver::new(BackendKind::Sdk, "ok");
        let cli = FakeDriver::new(BackendKind::Cli, "unused");
        let (coordinator, mut events) =
            ProcessCoordinator::new(sdk.clone(), cli, BackendKind::Sdk, &test_control());

        let first = coordinator.spawn(spawn_args("task-1")).await.unwrap();
        let _ = collect_until_completed(&mut events).await;
        let first_session = coordinator.get_worker(&first).await.unwrap().session_id;

        let second = coordinator
            .spawn_with_resume(spawn_args("task-2"))
            .await
            .unwrap();
        let _ = collect_until_completed(&mut events).await;
        let second_session = coordinator.get_worker(&second).await.unwrap().session_id;

        assert_eq!(first_session, second_session);
        assert_eq!(sdk.session_count(), 1);
    }

    #[tokio::test]
    async fn resume_falls_back_when_session_is_dead() {
        let sdk = FakeDriver::new(BackendKind::Sdk, "ok");
        let cli = FakeDriver::new(BackendKind::Cli, "unused");
        let (coordinator, mut events) =
            ProcessCoordinator::new(sdk.clone(), cli, BackendKind::Sdk, &test_control());

        let first = coordinator.spawn(spawn_args("task-1")).await.unwrap();
        let _ = collect_until_completed(&mut events).await;
        let first_session = coordinator.get_worker(&first).await.unwrap().session_id;

        // Provider lost its sessions (e.g. restart).
        sdk.drop_sessions();

        let second = coordinator
            .spawn_with_resume(spawn_args("task-2"))
            .await
            .unwrap();
        let _ = collect_until_completed(&mut events).await;
        let second_session = coordinator.get_worker(&second).await.unwrap().session_id;
        assert_ne!(first_session, second_session);
    }

    #[tokio::test]
    async fn kill_aborts_and_cleanup_drops_non_running() {
        let sdk = FakeDriver::new(BackendKind::Sdk, "ok");
        let cli = FakeDriver::new(BackendKind::Cli, "unused");
        let (coordinator, mut events) =
            ProcessCoordinator::new(sdk, cli, BackendKind::Sdk, &test_control());

        let worker_id = coordinator.spawn(spawn_args("task-1")).await.unwrap();
        let _ = collect_until_completed(&mut events).await;

        // Completed already; kill on a completed worker aborts its session.
        assert!(coordinator.kill(&worker_id).await);
        assert!(!coordinator.kill("unknown").await);

        let removed = coordinator.cleanup().await;
        assert_eq!(removed, 1);
        assert!(coordinator.get_worker(&worker_id).await.is_none());
    }

    #[tokio::test]
    async fn hot_swap_switches_active_backend() {
        let sdk = FakeDriver::new(BackendKind::Sdk, "from sdk");
        let cli = FakeDriver::new(BackendKind::Cli, "from cli");
        let (coordinator, mut events) =
            ProcessCoordinator::new(sdk, cli.clone(), BackendKind::Sdk, &test_control());

        let before = coordinator.spawn(spawn_args("task-1")).await.unwrap();
        let _ = collect_until_completed(&mut events).await;

        coordinator.set_backend(BackendKind::Cli).await.unwrap();
        assert_eq!(coordinator.backend_kind().await, BackendKind::Cli);

        let after = coordinator.spawn(spawn_args("task-2")).await.unwrap();
        let (_, content) = collect_until_completed(&mut events).await;
        assert_eq!(content, "from cli");
        assert_eq!(
            coordinator.get_worker(&after).await.unwrap().backend,
            BackendKind::Cli
        );
        // Pre-swap bookkeeping survives.
        assert!(coordinator.get_worker(&before).await.is_some());
    }
}
