//! In-memory byte pipe.
//!
//! A unidirectional queue with a single reader and any number of writers.
//! Reads block until bytes arrive or the last writer is dropped, at which
//! point the reader sees end-of-stream. Writes never block.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct PipeState {
    buffer: VecDeque<u8>,
    writers: usize,
    reader_alive: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected writer/reader pair.
pub fn byte_pipe() -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            buffer: VecDeque::new(),
            writers: 1,
            reader_alive: true,
        }),
        readable: Condvar::new(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Write end. Cloning adds a writer; the pipe reaches EOF once every clone is dropped.
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl Clone for PipeWriter {
    fn clone(&self) -> Self {
        self.shared.lock().writers += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.writers -= 1;
        if state.writers == 0 {
            self.shared.readable.notify_all();
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if !state.reader_alive {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "byte pipe reader was dropped",
            ));
        }
        state.buffer.extend(buf);
        self.shared.readable.notify_one();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end.
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for (dst, src) in buf.iter_mut().zip(state.buffer.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
            if state.writers == 0 {
                return Ok(0);
            }
            state = self
                .shared
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.lock().reader_alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reads_until_last_writer_drops() {
        let (mut w, mut r) = byte_pipe();
        let mut w2 = w.clone();
        w.write_all(b"hello ").unwrap();
        drop(w);
        w2.write_all(b"world").unwrap();
        drop(w2);

        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn read_blocks_until_data_arrives() {
        let (mut w, mut r) = byte_pipe();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            w.write_all(b"late").unwrap();
        });

        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        writer.join().unwrap();
        assert_eq!(out, b"late");
    }

    #[test]
    fn short_reads_preserve_order() {
        let (mut w, mut r) = byte_pipe();
        w.write_all(b"abcdef").unwrap();
        drop(w);

        let mut small = [0u8; 4];
        assert_eq!(r.read(&mut small).unwrap(), 4);
        assert_eq!(&small, b"abcd");
        assert_eq!(r.read(&mut small).unwrap(), 2);
        assert_eq!(&small[..2], b"ef");
        assert_eq!(r.read(&mut small).unwrap(), 0);
    }

    #[test]
    fn write_after_reader_dropped_is_broken_pipe() {
        let (mut w, r) = byte_pipe();
        drop(r);
        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
