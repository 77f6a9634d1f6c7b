pub mod cli;
pub mod events;
pub mod process;
pub mod protocol;
pub mod pump;
pub mod sdk;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ToolServerConfig;
use crate::error::GatewayError;

pub use cli::CliDriver;
pub use events::{decode_line, BackendEvent};
pub use sdk::SdkDriver;

/// The two interchangeable backend session providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One persistent provider process multiplexing many sessions.
    Sdk,
    /// One provider process per session.
    Cli,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sdk => "sdk",
            BackendKind::Cli => "cli",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sdk" => Ok(BackendKind::Sdk),
            "cli" => Ok(BackendKind::Cli),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstraction over a backend session provider. Session lifecycle is owned
/// by whichever provider created the session; callers only hold ids.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn start(&self) -> Result<(), GatewayError>;

    async fn stop(&self);

    fn is_running(&self) -> bool;

    /// Single-consumer event stream. Yields the receiver once per `start`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BackendEvent>>;

    async fn open_session(
        &self,
        title: &str,
        directory: Option<&str>,
        mode: Option<&str>,
    ) -> Result<String, GatewayError>;

    /// Whether the provider still holds live state for this session.
    async fn has_session(&self, session_id: &str) -> bool;

    /// Submit prompt text. The reply arrives as streamed events; `quiet`
    /// asks the provider to suppress the reply entirely.
    async fn submit_prompt(
        &self,
        session_id: &str,
        text: &str,
        quiet: bool,
    ) -> Result<(), GatewayError>;

    /// Idempotent. Unknown session ids return Ok(false).
    async fn abort(&self, session_id: &str) -> Result<bool, GatewayError>;

    async fn register_tool_server(
        &self,
        session_id: &str,
        server: &ToolServerConfig,
    ) -> Result<(), GatewayError>;

    /// Primary permission grant path.
    async fn approve_permission(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError>;

    /// Secondary, lower-level grant path used when the primary fails.
    async fn approve_permission_raw(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<(), GatewayError>;
}
