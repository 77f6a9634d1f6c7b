use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::GatewayError;

/// A spawned provider child with its stdin retained for control lines.
pub struct ProviderProcess {
    pub child: Child,
    pub stdin: ChildStdin,
}

pub struct SpawnedProvider {
    pub process: ProviderProcess,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub fn spawn_provider(
    command: &str,
    args: &[String],
    directory: Option<&str>,
) -> Result<SpawnedProvider, GatewayError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| GatewayError::Backend(format!("spawn {command}: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| GatewayError::Backend("provider stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::Backend("provider stdout unavailable".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| GatewayError::Backend("provider stderr unavailable".to_string()))?;

    Ok(SpawnedProvider {
        process: ProviderProcess { child, stdin },
        stdout,
        stderr,
    })
}

pub async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), GatewayError> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}
