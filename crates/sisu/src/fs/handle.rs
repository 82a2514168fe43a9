//! File handles returned by open and create.
//!
//! Reads are served from an immutable snapshot fetched at open time. Writes
//! buffer in memory and commit to the provider on flush, which is what
//! gives object-style backends their all-or-nothing file semantics.

// Mutex/RwLock.lock().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::error::Result;
use crate::provider::Provider;

use super::engine::Overlays;

/// Read-only handle backed by the full content of a file.
pub struct ReadHandle {
    data: Vec<u8>,
}

impl ReadHandle {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Slice of the content at `offset`, clamped at EOF.
    pub fn read_at(&self, offset: i64, size: u32) -> &[u8] {
        let start = offset.max(0) as usize;
        if start >= self.data.len() {
            return &[];
        }
        let end = self.data.len().min(start + size as usize);
        &self.data[start..end]
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Write handle buffering content until flush.
///
/// An offset-zero write resets the buffer and later writes append, which
/// covers the usual copy/redirect pattern of a full rewrite arriving as
/// sequential writes from zero. Random-offset writes are not supported and
/// may produce incorrect content.
///
/// The engine's pending-write table holds the owning reference while the
/// handle is live; the handle keeps only a weak back-reference and removes
/// itself from the table on release.
pub struct WriteHandle {
    path: String,
    subpath: String,
    provider: Arc<dyn Provider>,
    buf: Mutex<Vec<u8>>,
    overlays: Weak<RwLock<Overlays>>,
}

impl WriteHandle {
    pub(crate) fn new(
        path: String,
        subpath: String,
        provider: Arc<dyn Provider>,
        overlays: Weak<RwLock<Overlays>>,
    ) -> Self {
        Self {
            path,
            subpath,
            provider,
            buf: Mutex::new(Vec::new()),
            overlays,
        }
    }

    /// Buffer `data`; returns the number of bytes accepted.
    pub fn write(&self, data: &[u8], offset: i64) -> usize {
        let mut buf = self.buf.lock().unwrap();
        if offset == 0 {
            buf.clear();
        }
        buf.extend_from_slice(data);
        data.len()
    }

    /// Commit the buffered content to the provider. Empty buffers are not
    /// committed, so a bare create followed by close writes nothing.
    pub async fn flush(&self) -> Result<()> {
        let data = self.buf.lock().unwrap().clone();
        if data.is_empty() {
            return Ok(());
        }
        self.provider.write(&self.subpath, &data).await
    }

    /// Drop the pending-table entry and the buffer.
    pub fn release(&self) {
        if let Some(overlays) = self.overlays.upgrade() {
            overlays.write().unwrap().pending.remove(&self.path);
        }
        self.buf.lock().unwrap().clear();
    }

    /// Reset the buffer (truncate-to-zero).
    pub fn truncate(&self) {
        self.buf.lock().unwrap().clear();
    }

    /// Read back from the in-flight buffer.
    pub fn read_at(&self, offset: i64, size: u32) -> Vec<u8> {
        let buf = self.buf.lock().unwrap();
        let start = offset.max(0) as usize;
        if start >= buf.len() {
            return Vec::new();
        }
        let end = buf.len().min(start + size as usize);
        buf[start..end].to_vec()
    }

    /// Current buffer length, reported by stat while the write is in flight.
    pub fn len(&self) -> u64 {
        self.buf.lock().unwrap().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::provider::Entry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sink {
        writes: Mutex<Vec<(String, Vec<u8>)>>,
        write_calls: AtomicUsize,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
                write_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for Sink {
        fn name(&self) -> &'static str {
            "sink"
        }
        async fn read_dir(&self, _path: &str) -> Result<Vec<Entry>> {
            Ok(vec![])
        }
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            Err(Error::not_found(path))
        }
        async fn stat(&self, path: &str) -> Result<Entry> {
            Err(Error::not_found(path))
        }
        async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            self.writes
                .lock()
                .unwrap()
                .push((path.to_string(), data.to_vec()));
            Ok(())
        }
        async fn delete(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    fn handle_with(provider: Arc<Sink>) -> WriteHandle {
        WriteHandle::new(
            "default/us-east-1/ssm/app/key".to_string(),
            "app/key".to_string(),
            provider,
            Weak::new(),
        )
    }

    #[test]
    fn read_handle_clamps_at_eof() {
        let h = ReadHandle::new(b"hello world".to_vec());
        assert_eq!(h.read_at(0, 5), b"hello");
        assert_eq!(h.read_at(6, 100), b"world");
        assert_eq!(h.read_at(50, 10), b"");
        assert_eq!(h.len(), 11);
    }

    #[tokio::test]
    async fn offset_zero_resets_then_appends() {
        let sink = Sink::new();
        let h = handle_with(Arc::clone(&sink));

        h.write(b"first", 0);
        h.write(b" second", 5);
        assert_eq!(h.len(), 12);

        // A fresh rewrite from zero discards the old buffer.
        h.write(b"new", 0);
        assert_eq!(h.len(), 3);

        h.flush().await.unwrap();
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), [("app/key".to_string(), b"new".to_vec())]);
    }

    #[tokio::test]
    async fn empty_buffer_is_not_committed() {
        let sink = Sink::new();
        let h = handle_with(Arc::clone(&sink));
        h.flush().await.unwrap();
        assert_eq!(sink.write_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn truncate_resets_the_buffer() {
        let sink = Sink::new();
        let h = handle_with(sink);
        h.write(b"content", 0);
        h.truncate();
        assert!(h.is_empty());
    }

    #[test]
    fn read_back_from_in_flight_buffer() {
        let sink = Sink::new();
        let h = handle_with(sink);
        h.write(b"buffered", 0);
        assert_eq!(h.read_at(0, 3), b"buf");
        assert_eq!(h.read_at(100, 3), b"");
    }
}
