use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{decode_line, BackendEvent};

/// Pump a provider's stdout into decoded events. Lines that fail to decode
/// are counted and skipped, never fatal. EOF flushes the final partial
/// line. Returns the number of skipped lines.
pub fn spawn_event_pump<R>(
    mut rd: R,
    tx: mpsc::UnboundedSender<BackendEvent>,
    default_session: Option<String>,
    label: &'static str,
) -> JoinHandle<u64>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut line_buf: Vec<u8> = Vec::with_capacity(8 * 1024);
        let mut skipped = 0u64;

        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("{label} event stream read failed: {e}");
                    break;
                }
            };

            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let one = line_buf.drain(..=pos).collect::<Vec<u8>>();
                let line = String::from_utf8_lossy(&one);
                if !emit(&tx, line.trim_end(), &default_session, &mut skipped) {
                    return skipped;
                }
            }
        }

        // EOF flush: deliver the last partial line if it doesn't end with '\n'.
        if !line_buf.is_empty() {
            let line = String::from_utf8_lossy(&line_buf).to_string();
            emit(&tx, line.trim_end(), &default_session, &mut skipped);
        }

        if skipped > 0 {
            tracing::debug!("{label} event stream skipped {skipped} undecodable lines");
        }
        skipped
    })
}

fn emit(
    tx: &mpsc::UnboundedSender<BackendEvent>,
    line: &str,
    default_session: &Option<String>,
    skipped: &mut u64,
) -> bool {
    if line.is_empty() {
        return true;
    }
    match decode_line(line) {
        Some(event) => {
            let event = match default_session {
                Some(session_id) => event.with_default_session(session_id),
                None => event,
            };
            tx.send(event).is_ok()
        }
        None => {
            *skipped += 1;
            true
        }
    }
}

/// Drain a provider's stderr into debug logs.
pub fn spawn_stderr_pump<R>(mut rd: R, label: &'static str) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4 * 1024];
        let mut line_buf: Vec<u8> = Vec::new();
        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let one = line_buf.drain(..=pos).collect::<Vec<u8>>();
                let line = String::from_utf8_lossy(&one);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!("{label} stderr: {line}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn decodes_lines_and_flushes_partial_on_eof() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_event_pump(rd, tx, None, "test");

        wr.write_all(b"{\"type\":\"session.idle\",\"session_id\":\"s1\"}\n")
            .await
            .unwrap();
        wr.write_all(b"{\"type\":\"server.heartbeat\"}")
            .await
            .unwrap();
        drop(wr);

        assert_eq!(
            rx.recv().await,
            Some(BackendEvent::SessionIdle {
                session_id: "s1".into()
            })
        );
        assert_eq!(rx.recv().await, Some(BackendEvent::Heartbeat));
        assert_eq!(task.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_corrupt_lines_and_continues() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_event_pump(rd, tx, None, "test");

        wr.write_all(b"{corrupt\n{\"type\":\"server.heartbeat\"}\n")
            .await
            .unwrap();
        drop(wr);

        assert_eq!(rx.recv().await, Some(BackendEvent::Heartbeat));
        assert_eq!(task.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn applies_default_session_to_bare_events() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = spawn_event_pump(rd, tx, Some("s7".to_string()), "test");

        wr.write_all(b"{\"type\":\"session.idle\"}\n").await.unwrap();
        drop(wr);

        assert_eq!(
            rx.recv().await,
            Some(BackendEvent::SessionIdle {
                session_id: "s7".into()
            })
        );
    }
}
