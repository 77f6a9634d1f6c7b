use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::PersistError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRead {
    pub content: String,
    pub truncated: bool,
}

/// Approximate raw size of a base64 payload: floor(len * 3/4). An
/// approximation, not a decode.
pub fn approx_decoded_size(b64_len: usize) -> u64 {
    (b64_len as u64 * 3) / 4
}

/// Encode and write a task's raw output history.
pub async fn write_history(path: &Path, raw: &str) -> Result<(), PersistError> {
    let encoded = STANDARD.encode(raw.as_bytes());
    tokio::fs::write(path, encoded).await?;
    Ok(())
}

/// Write an already-encoded payload verbatim (legacy migration path).
pub async fn write_history_encoded(path: &Path, encoded: &str) -> Result<(), PersistError> {
    tokio::fs::write(path, encoded).await?;
    Ok(())
}

pub fn decode_history(encoded: &str) -> Result<String, PersistError> {
    let bytes = STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| PersistError::HistoryDecode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Bounded tail read. When the file exceeds `max` the read seeks to
/// `len - max` (aligned up to a base64 quantum so the tail still decodes)
/// and returns a truncated flag; otherwise the whole file is decoded.
pub async fn read_history(path: &Path, max: Option<u64>) -> Result<HistoryRead, PersistError> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    let (start, truncated) = match max {
        Some(max) if len > max => {
            let raw_start = len - max;
            (raw_start + (4 - raw_start % 4) % 4, true)
        }
        _ => (0, false),
    };

    if start > 0 {
        file.seek(std::io::SeekFrom::Start(start)).await?;
    }
    let mut encoded = String::new();
    file.read_to_string(&mut encoded).await?;

    Ok(HistoryRead {
        content: decode_history(&encoded)?,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn approximation_is_floor_three_quarters() {
        assert_eq!(approx_decoded_size(100), 75);
        assert_eq!(approx_decoded_size(10), 7);
        assert_eq!(approx_decoded_size(0), 0);
    }

    #[tokio::test]
    async fn round_trips_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.txt");
        write_history(&path, "line one\nline two").await.unwrap();

        let read = read_history(&path, None).await.unwrap();
        assert_eq!(read.content, "line one\nline two");
        assert!(!read.truncated);
    }

    #[tokio::test]
    async fn bounded_read_returns_decodable_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.txt");
        let raw = "0123456789".repeat(100);
        write_history(&path, &raw).await.unwrap();

        let read = read_history(&path, Some(40)).await.unwrap();
        assert!(read.truncated);
        assert!(!read.content.is_empty());
        assert!(read.content.len() <= 40);
        assert!(raw.ends_with(&read.content));
    }

    #[tokio::test]
    async fn small_file_is_never_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.txt");
        write_history(&path, "short").await.unwrap();

        let read = read_history(&path, Some(1 << 20)).await.unwrap();
        assert_eq!(read.content, "short");
        assert!(!read.truncated);
    }
}
