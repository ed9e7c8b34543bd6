//! Bounded capture of subprocess output

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::trace;

/// Lines kept in arrival order; oldest lines go first once `max_bytes` is
/// exceeded.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    dropped: u64,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        self.bytes += line.len();
        self.lines.push_back(line);
        while self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(old) => {
                    self.bytes -= old.len();
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Lines evicted so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Shared handle to an [`OutputBuffer`] filled by a capture task
#[derive(Debug, Clone)]
pub struct SharedOutput(Arc<Mutex<OutputBuffer>>);

impl SharedOutput {
    pub fn new(max_bytes: usize) -> Self {
        Self(Arc::new(Mutex::new(OutputBuffer::new(max_bytes))))
    }

    pub fn lock(&self) -> MutexGuard<'_, OutputBuffer> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, line: String) {
        self.lock().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock().lines()
    }

    /// Copy `reader` line by line into this buffer until EOF
    pub fn spawn_capture<R>(&self, reader: R, label: &'static str, pid: Option<u32>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(?pid, stream = label, "{}", line);
                sink.push(line);
            }
        });
    }
}

/// Snapshot of both captured streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}
