use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Per-session transient record between prompt submission and a terminal
/// event or timeout. Accumulates the deltas emitted since the prompt was
/// sent and resolves exactly once with their concatenation.
pub struct PendingCompletion {
    tx: oneshot::Sender<String>,
    parts: Vec<String>,
    pub since: DateTime<Utc>,
}

impl PendingCompletion {
    pub fn new() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx,
                parts: Vec::new(),
                since: Utc::now(),
            },
            rx,
        )
    }

    pub fn push_delta(&mut self, delta: &str) {
        self.parts.push(delta.to_string());
    }

    pub fn accumulated(&self) -> String {
        self.parts.concat()
    }

    pub fn resolve(self) {
        let content = self.parts.concat();
        // Receiver may have given up (timeout); that is not an error here.
        let _ = self.tx.send(content);
    }
}
