//! Fan-out of one standard stream into its own buffer and the combined stream.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::byte_pipe::PipeWriter;
use super::types::{ChunkRecord, StdStream};

/// Combined sink shared by every tee of a session, behind the combined writer lock.
///
/// The pipe writer is closed once all contributors have released it, which is
/// what lets the combined drain pump reach end-of-stream.
#[derive(Debug)]
pub struct CombinedSink {
    writer: Option<PipeWriter>,
    contributors: usize,
    timeline: Vec<ChunkRecord>,
}

pub type SharedCombinedSink = Arc<Mutex<CombinedSink>>;

impl CombinedSink {
    pub fn shared(writer: PipeWriter, contributors: usize) -> SharedCombinedSink {
        Arc::new(Mutex::new(Self {
            writer: Some(writer),
            contributors,
            timeline: Vec::new(),
        }))
    }

    fn write_chunk(&mut self, stream: StdStream, bytes: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "combined sink already closed")
        })?;
        writer.write_all(bytes)?;
        self.timeline.push(ChunkRecord {
            at: Utc::now(),
            stream,
            len: bytes.len(),
        });
        Ok(())
    }

    fn release(&mut self) {
        self.contributors = self.contributors.saturating_sub(1);
        if self.contributors == 0 {
            self.writer = None;
        }
    }

    pub fn take_timeline(&mut self) -> Vec<ChunkRecord> {
        std::mem::take(&mut self.timeline)
    }
}

fn lock(sink: &SharedCombinedSink) -> MutexGuard<'_, CombinedSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Takes the timeline out of a shared combined sink.
pub fn take_timeline(sink: &SharedCombinedSink) -> Vec<ChunkRecord> {
    lock(sink).take_timeline()
}

/// Per-stream multiplexer.
///
/// Every write lands in the stream's own pipe first, then (optionally) in the
/// original stream, then in the combined sink under the combined writer lock.
/// The chunk goes to the combined sink as it arrives, so combined order is
/// the order in which tees take the lock. Dropping the tee closes its own pipe
/// and releases its combined contributor.
pub struct Tee {
    stream: StdStream,
    own: PipeWriter,
    combined: SharedCombinedSink,
    passthrough: Option<Box<dyn Write + Send>>,
}

impl Tee {
    pub fn new(
        stream: StdStream,
        own: PipeWriter,
        combined: SharedCombinedSink,
        passthrough: Option<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            stream,
            own,
            combined,
            passthrough,
        }
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.own.write_all(buf)?;
        if let Some(original) = self.passthrough.as_mut() {
            original.write_all(buf)?;
        }
        lock(&self.combined).write_chunk(self.stream, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.passthrough.as_mut() {
            Some(original) => original.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Tee {
    fn drop(&mut self) {
        lock(&self.combined).release();
    }
}
