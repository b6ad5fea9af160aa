// ABOUTME: Log accumulation for provisioning runs
// ABOUTME: Per-process output aggregation and the run-wide status log

use crate::capability::OutputStream;

/// Cumulative output of one spawned process.
///
/// Chunks are appended verbatim in arrival order; nothing is ever dropped
/// and the buffer only grows for the lifetime of the run.
#[derive(Debug, Default, Clone)]
pub struct LogAggregator {
    buffer: String,
    chunks: usize,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and return the cumulative buffer.
    /// An empty chunk leaves the content unchanged but still counts as an update.
    pub fn push(&mut self, chunk: &str) -> &str {
        self.buffer.push_str(chunk);
        self.chunks += 1;
        &self.buffer
    }

    /// Drain `output` until the process closes it, invoking `on_chunk` with
    /// each new chunk and the cumulative buffer after it.
    pub async fn attach<F>(&mut self, output: &mut OutputStream, mut on_chunk: F)
    where
        F: FnMut(&str, &str),
    {
        while let Some(chunk) = output.next_chunk().await {
            let cumulative = self.push(&chunk);
            on_chunk(&chunk, cumulative);
        }
    }

    /// Consume only the chunks already buffered, without waiting
    pub fn drain_ready<F>(&mut self, output: &mut OutputStream, mut on_chunk: F)
    where
        F: FnMut(&str, &str),
    {
        while let Some(chunk) = output.try_next_chunk() {
            let cumulative = self.push(&chunk);
            on_chunk(&chunk, cumulative);
        }
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn into_contents(self) -> String {
        self.buffer
    }
}

/// The one status buffer of a run: phase messages interleaved with process
/// output. Never cleared mid-run.
#[derive(Debug, Default, Clone)]
pub struct StatusLog {
    buffer: String,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a status message on its own line and return the appended text
    pub fn push_line(&mut self, message: &str) -> String {
        let mut appended = String::new();
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            appended.push('\n');
        }
        appended.push_str(message);
        appended.push('\n');
        self.buffer.push_str(&appended);
        appended
    }

    /// Append process output verbatim
    pub fn push_chunk(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn snapshot(&self) -> String {
        self.buffer.clone()
    }
}
