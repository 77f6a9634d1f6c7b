use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
}

/// Bounded, ordered chunk buffer. Eviction always removes oldest whole
/// chunks; the chunk just pushed survives even when it alone exceeds the
/// budget, so `size()` may transiently exceed `cap` by that one chunk.
#[derive(Clone)]
pub struct ChunkRing {
    inner: Arc<Mutex<Inner>>,
    cap: usize,
}

impl ChunkRing {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            cap,
        }
    }

    pub fn push(&self, chunk: impl Into<Vec<u8>>) {
        let chunk = chunk.into();
        let mut g = self.inner.lock().unwrap();
        g.total += chunk.len();
        g.chunks.push_back(chunk);
        while g.total > self.cap && g.chunks.len() > 1 {
            if let Some(evicted) = g.chunks.pop_front() {
                g.total -= evicted.len();
            }
        }
    }

    /// Total byte size of all retained chunks.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().total
    }

    /// Number of retained chunks.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trailing `n` bytes of the concatenation, clamped to the total size.
    /// Correct across chunk boundaries.
    pub fn last_bytes(&self, n: usize) -> Vec<u8> {
        let g = self.inner.lock().unwrap();
        let want = n.min(g.total);
        let mut out: Vec<u8> = Vec::with_capacity(want);
        let mut remaining = want;
        let mut rev: Vec<&[u8]> = Vec::new();
        for chunk in g.chunks.iter().rev() {
            if remaining == 0 {
                break;
            }
            if chunk.len() >= remaining {
                rev.push(&chunk[chunk.len() - remaining..]);
                remaining = 0;
            } else {
                rev.push(chunk.as_slice());
                remaining -= chunk.len();
            }
        }
        for part in rev.into_iter().rev() {
            out.extend_from_slice(part);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let g = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(g.total);
        for chunk in &g.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).to_string()
    }

    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        g.chunks.clear();
        g.total = 0;
    }

    /// Generic fold over the retained chunks, oldest first.
    pub fn fold<B, F>(&self, init: B, mut f: F) -> B
    where
        F: FnMut(B, &[u8]) -> B,
    {
        let g = self.inner.lock().unwrap();
        let mut acc = init;
        for chunk in &g.chunks {
            acc = f(acc, chunk.as_slice());
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_whole_chunks() {
        let ring = ChunkRing::new(10);
        ring.push(b"aaaa".to_vec());
        ring.push(b"bbbb".to_vec());
        ring.push(b"cccc".to_vec());
        assert!(ring.size() <= 10);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.to_bytes(), b"bbbbcccc");
    }

    #[test]
    fn keeps_single_oversized_chunk() {
        let ring = ChunkRing::new(4);
        ring.push(b"small".to_vec());
        ring.push(b"way too large for the cap".to_vec());
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.to_bytes(), b"way too large for the cap");
        // Size exceeds the cap by exactly the oversized chunk.
        assert_eq!(ring.size(), 25);
    }

    #[test]
    fn last_bytes_spans_chunk_boundaries() {
        let ring = ChunkRing::new(1024);
        ring.push(b"hello".to_vec());
        ring.push(b" ".to_vec());
        ring.push(b"world".to_vec());
        assert_eq!(ring.last_bytes(6), b" world");
        assert_eq!(ring.last_bytes(100), b"hello world");
        assert_eq!(ring.last_bytes(0), b"");
    }

    #[test]
    fn fold_visits_oldest_first() {
        let ring = ChunkRing::new(1024);
        ring.push(b"a".to_vec());
        ring.push(b"b".to_vec());
        let joined = ring.fold(String::new(), |mut acc, chunk| {
            acc.push_str(&String::from_utf8_lossy(chunk));
            acc
        });
        assert_eq!(joined, "ab");
    }

    #[test]
    fn clear_resets_size_and_len() {
        let ring = ChunkRing::new(16);
        ring.push(b"data".to_vec());
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.size(), 0);
    }
}
