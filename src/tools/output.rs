//! Bounded output capture
//!
//! Child output is drained continuously so the child never blocks on a full
//! pipe, but only the first `cap` bytes are kept. The drain task writes into
//! a [`SharedOutput`] so the executor can take what arrived even when it
//! stops waiting for EOF.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Byte buffer that stops growing at a fixed cap
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }

    /// Append a chunk, dropping whatever does not fit
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether any bytes were dropped at the cap
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Lossy UTF-8 view of the captured bytes
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Cut the buffer down to `cap` after the fact
    pub fn capped(mut self, cap: usize) -> Self {
        if self.data.len() > cap {
            self.data.truncate(cap);
            self.truncated = true;
        }
        self.cap = cap;
        self
    }
}

/// Capture buffer shared between a drain task and its owner
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Arc<Mutex<OutputBuffer>>);

impl SharedOutput {
    pub fn new(cap: usize) -> Self {
        Self(Arc::new(Mutex::new(OutputBuffer::new(cap))))
    }

    // A panicked writer leaves a valid buffer behind
    fn lock(&self) -> MutexGuard<'_, OutputBuffer> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, chunk: &[u8]) {
        self.lock().push(chunk);
    }

    /// Take everything captured so far, leaving an empty buffer
    pub fn take(&self) -> OutputBuffer {
        std::mem::take(&mut *self.lock())
    }
}

/// Read `reader` to EOF into `sink`
///
/// Read errors end the capture early; whatever was collected is kept.
pub async fn drain<R>(mut reader: R, sink: SharedOutput)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.push(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}
