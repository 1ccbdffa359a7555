//! Captured stdout/stderr for sandboxed executions.
//!
//! The sandbox replaces `sys.stdout` and `sys.stderr` with writers backed
//! by these buffers so that generated code cannot write to the host
//! streams. Captured text is surfaced through tracing at debug level.

use std::sync::{Arc, Mutex};

/// A bounded, shareable byte buffer for one of the two output streams.
#[derive(Clone, Debug)]
pub struct CapturedStream {
    buffer: Arc<Mutex<Vec<u8>>>,
    limit: usize,
}

impl CapturedStream {
    /// Create a stream that keeps at most `limit` bytes; writes beyond the
    /// limit are dropped rather than failing the generated code.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    /// Append data, truncating at the configured limit. Returns how many
    /// bytes were kept.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut buffer = self.buffer.lock().unwrap();
        let remaining = self.limit.saturating_sub(buffer.len());
        let kept = remaining.min(data.len());
        buffer.extend_from_slice(&data[..kept]);
        kept
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).to_string()
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stdout/stderr capture for a single sandbox invocation.
#[derive(Clone, Debug)]
pub struct SandboxOutput {
    /// Captured stdout.
    pub stdout: CapturedStream,
    /// Captured stderr.
    pub stderr: CapturedStream,
}

impl SandboxOutput {
    /// Create a capture pair sharing one byte budget per stream.
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: CapturedStream::new(limit),
            stderr: CapturedStream::new(limit),
        }
    }

    /// Emit whatever was captured through tracing, then drop it.
    pub fn log_captured(&self, target: &str) {
        let stdout = self.stdout.to_string_lossy();
        if !stdout.trim().is_empty() {
            tracing::debug!(%target, output = %stdout.trim_end(), "sandbox stdout");
        }
        let stderr = self.stderr.to_string_lossy();
        if !stderr.trim().is_empty() {
            tracing::debug!(%target, output = %stderr.trim_end(), "sandbox stderr");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_stream() {
        let stream = CapturedStream::new(1024);
        assert_eq!(stream.write(b"hello "), 6);
        assert_eq!(stream.write(b"world"), 5);
        assert_eq!(stream.to_string_lossy(), "hello world");
    }

    #[test]
    fn test_limit_truncates() {
        let stream = CapturedStream::new(8);
        assert_eq!(stream.write(b"hello"), 5);
        assert_eq!(stream.write(b"world"), 3);
        assert_eq!(stream.to_string_lossy(), "hellowor");
        assert_eq!(stream.write(b"more"), 0);
        assert_eq!(stream.len(), 8);
    }

    #[test]
    fn test_sandbox_output_starts_empty() {
        let output = SandboxOutput::new(1024);
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
    }
}
