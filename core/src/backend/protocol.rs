//! Outbound control lines written to a provider's stdin, one JSON document
//! per line.

use serde::Serialize;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Serialize)]
pub struct SessionOpenCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Provider-specific session mode hint, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl SessionOpenCmd {
    pub fn new(
        session_id: String,
        title: String,
        directory: Option<String>,
        mode: Option<String>,
    ) -> Self {
        Self {
            v: 1,
            ty: "session.open",
            ts: now_rfc3339(),
            session_id,
            title,
            directory,
            mode,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PromptCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub text: String,
    /// Ask the provider to suppress the reply stream.
    pub quiet: bool,
}

impl PromptCmd {
    pub fn new(session_id: String, text: String, quiet: bool) -> Self {
        Self {
            v: 1,
            ty: "session.prompt",
            ts: now_rfc3339(),
            session_id,
            text,
            quiet,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionAbortCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub reason: String,
}

impl SessionAbortCmd {
    pub fn new(session_id: String, reason: String) -> Self {
        Self {
            v: 1,
            ty: "session.abort",
            ts: now_rfc3339(),
            session_id,
            reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolServerRegisterCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl ToolServerRegisterCmd {
    pub fn new(session_id: String, name: String, command: String, args: Vec<String>) -> Self {
        Self {
            v: 1,
            ty: "tool_server.register",
            ts: now_rfc3339(),
            session_id,
            name,
            command,
            args,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionGrantCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub request_id: String,
}

impl PermissionGrantCmd {
    pub fn new(session_id: String, request_id: String) -> Self {
        Self {
            v: 1,
            ty: "permission.grant",
            ts: now_rfc3339(),
            session_id,
            request_id,
        }
    }
}

/// Low-level respond form, the fallback when `permission.grant` fails.
#[derive(Debug, Serialize)]
pub struct PermissionRespondCmd {
    pub v: u8,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub ts: String,
    pub session_id: String,
    pub request_id: String,
    pub response: &'static str,
}

impl PermissionRespondCmd {
    pub fn new(session_id: String, request_id: String) -> Self {
        Self {
            v: 1,
            ty: "permission.respond",
            ts: now_rfc3339(),
            session_id,
            request_id,
            response: "allow",
        }
    }
}

pub fn to_line<T: Serialize>(cmd: &T) -> String {
    serde_json::to_string(cmd).unwrap_or_else(|_| "{}".to_string())
}
