use thiserror::Error;

use crate::registry::transitions::TransitionError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("prompt already in flight for session {0}")]
    PromptInFlight(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("event decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    #[error("backend start failed: {0}")]
    BackendStart(String),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt registry document: {0}")]
    Corrupt(String),
    #[error("history decode error: {0}")]
    HistoryDecode(String),
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("coordinator failed: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("registry failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
