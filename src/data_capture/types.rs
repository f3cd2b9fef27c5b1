//! Common data types used across the data_capture subsystem.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-wide standard output channels that can be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StdStream {
    /// Primary output, descriptor 1.
    Stdout,
    /// Error output, descriptor 2.
    Stderr,
}

impl StdStream {
    /// Both streams, in the order a session installs them.
    pub const ALL: [StdStream; 2] = [StdStream::Stdout, StdStream::Stderr];

    /// Raw descriptor number of the stream.
    pub fn fd(self) -> i32 {
        match self {
            StdStream::Stdout => 1,
            StdStream::Stderr => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One chunk as it entered the combined stream.
///
/// Records are appended while the combined writer lock is held, so the
/// timeline order is exactly the order of the combined text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Wall-clock time the chunk was admitted into the combined sink.
    pub at: DateTime<Utc>,
    /// Stream the chunk was written to.
    pub stream: StdStream,
    /// Chunk size in bytes.
    pub len: usize,
}

/// Text captured by one capture session.
///
/// Built once when the session completes and handed to the caller by value;
/// the capture machinery never touches it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResult {
    /// Identifier of the session that produced this output (also used in logs).
    pub session_id: Uuid,
    /// Everything written to standard output.
    pub stdout: String,
    /// Everything written to standard error.
    pub stderr: String,
    /// Both streams merged in the order their chunks reached the combined sink.
    pub combined: String,
    /// Per-chunk provenance of `combined`.
    pub timeline: Vec<ChunkRecord>,
    /// Time from redirection to the last pump finishing.
    pub elapsed: Duration,
    #[serde(skip)]
    raw: RawOutput,
}

#[derive(Debug, Clone, Default)]
struct RawOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    combined: Vec<u8>,
}

impl OutputResult {
    pub(crate) fn new(
        session_id: Uuid,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        combined: Vec<u8>,
        timeline: Vec<ChunkRecord>,
        elapsed: Duration,
    ) -> Self {
        Self {
            session_id,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            combined: String::from_utf8_lossy(&combined).into_owned(),
            timeline,
            elapsed,
            raw: RawOutput {
                stdout,
                stderr,
                combined,
            },
        }
    }

    /// Raw standard output bytes, before lossy UTF-8 decoding.
    ///
    /// Empty when the result was deserialized rather than captured.
    pub fn stdout_bytes(&self) -> &[u8] {
        &self.raw.stdout
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.raw.stderr
    }

    pub fn combined_bytes(&self) -> &[u8] {
        &self.raw.combined
    }

    /// True when the captured work wrote nothing to either stream.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty() && self.combined.is_empty()
    }

    /// Number of bytes captured across both streams.
    pub fn total_bytes(&self) -> u64 {
        (self.raw.stdout.len() + self.raw.stderr.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_descriptors_and_labels() {
        assert_eq!(StdStream::Stdout.fd(), 1);
        assert_eq!(StdStream::Stderr.fd(), 2);
        assert_eq!(StdStream::Stderr.to_string(), "stderr");
        assert_eq!(StdStream::ALL, [StdStream::Stdout, StdStream::Stderr]);
    }

    #[test]
    fn output_result_decodes_lossily_and_keeps_bytes() {
        let out = OutputResult::new(
            Uuid::new_v4(),
            b"ok\n".to_vec(),
            vec![0xff, b'\n'],
            b"ok\n\xff\n".to_vec(),
            Vec::new(),
            Duration::from_millis(3),
        );
        assert_eq!(out.stdout, "ok\n");
        assert_eq!(out.stderr, "\u{fffd}\n");
        assert_eq!(out.stderr_bytes(), &[0xff, b'\n']);
        assert_eq!(out.combined_bytes(), b"ok\n\xff\n");
        assert_eq!(out.total_bytes(), 5);
        assert!(!out.is_empty());
    }

    #[test]
    fn serialized_result_skips_raw_bytes() {
        let out = OutputResult::new(
            Uuid::new_v4(),
            b"a".to_vec(),
            Vec::new(),
            b"a".to_vec(),
            vec![ChunkRecord {
                at: Utc::now(),
                stream: StdStream::Stdout,
                len: 1,
            }],
            Duration::from_millis(1),
        );
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"stdout\":\"a\""));
        assert!(json.contains("\"Stdout\""));

        let back: OutputResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.combined, "a");
        assert_eq!(back.timeline.len(), 1);
        assert!(back.combined_bytes().is_empty());
    }
}
