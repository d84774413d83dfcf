//! In-memory write transactions.
//!
//! A file created on a writable collection accumulates its bytes here
//! until release, when the whole buffer is uploaded in one request.

use dashmap::DashMap;

use crate::vfs::{VfsError, VfsResult};

/// Largest buffer accepted. Slack and Discord both reject emoji well below
/// this, so anything bigger is a mistake rather than an image.
pub const MAX_BUFFER: usize = 16 * 1024 * 1024;

/// Open write buffers keyed by the backend-relative path.
#[derive(Debug, Default)]
pub struct WriteBuffers {
    buffers: DashMap<String, Vec<u8>>,
}

/// Buffer length after growing to `end`, if that is within [`MAX_BUFFER`].
fn bounded(path: &str, end: Option<u64>) -> VfsResult<usize> {
    end.and_then(|end| usize::try_from(end).ok())
        .filter(|&end| end <= MAX_BUFFER)
        .ok_or_else(|| VfsError::FileTooLarge(path.to_string()))
}

impl WriteBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty transaction, discarding any previous one at `path`.
    pub fn open(&self, path: &str) {
        self.buffers.insert(path.to_string(), Vec::new());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.buffers.contains_key(path)
    }

    /// Write at `offset`, zero-filling any gap. `Ok(None)` if nothing is open.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<Option<usize>> {
        let Some(mut buf) = self.buffers.get_mut(path) else {
            return Ok(None);
        };
        let end = bounded(path, offset.checked_add(data.len() as u64))?;
        let start = end - data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(Some(data.len()))
    }

    /// Resize the buffer. `Ok(None)` if nothing is open.
    pub fn truncate(&self, path: &str, size: u64) -> VfsResult<Option<()>> {
        let Some(mut buf) = self.buffers.get_mut(path) else {
            return Ok(None);
        };
        buf.resize(bounded(path, Some(size))?, 0);
        Ok(Some(()))
    }

    /// Read back uncommitted bytes.
    pub fn read(&self, path: &str, offset: u64, size: u32) -> Option<Vec<u8>> {
        let buf = self.buffers.get(path)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buf.len());
        let end = start.saturating_add(size as usize).min(buf.len());
        Some(buf[start..end].to_vec())
    }

    pub fn len(&self, path: &str) -> Option<u64> {
        self.buffers.get(path).map(|b| b.len() as u64)
    }

    /// Close the transaction, handing back its bytes.
    pub fn take(&self, path: &str) -> Option<Vec<u8>> {
        self.buffers.remove(path).map(|(_, data)| data)
    }

    /// Abort the transaction. Returns whether one was open.
    pub fn discard(&self, path: &str) -> bool {
        self.buffers.remove(path).is_some()
    }
}
