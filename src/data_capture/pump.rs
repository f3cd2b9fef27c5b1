//! Background pumps copying a reader into a sink until end-of-stream.
//!
//! A session runs two kinds: relays (OS pipe read end into a [`Tee`]) and
//! drains (in-memory pipe into a `Vec<u8>`). Both are the same loop; only the
//! sink differs.
//!
//! [`Tee`]: super::tee::Tee

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use crate::error_handling::types::CaptureError;

/// Pump whose sink is an append-only byte buffer.
pub type DrainPump = Pump<Vec<u8>>;

/// Handle on a running pump thread.
///
/// The sink is only handed back by [`Pump::wait`], after the reader reported
/// end-of-stream, so partial contents are never observable.
#[derive(Debug)]
pub struct Pump<W> {
    name: String,
    handle: JoinHandle<Result<W, CaptureError>>,
}

impl<W> Pump<W>
where
    W: Write + Send + 'static,
{
    /// Spawns the pump thread.
    ///
    /// Errors
    /// - Returns [`CaptureError::DrainError`] if the thread cannot be spawned.
    pub fn start<R>(
        name: impl Into<String>,
        reader: R,
        sink: W,
        buffer_size: usize,
    ) -> Result<Self, CaptureError>
    where
        R: Read + Send + 'static,
    {
        let name = name.into();
        let pump_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || pump(&pump_name, reader, sink, buffer_size.max(1)))
            .map_err(|e| CaptureError::DrainError(name.clone(), e))?;
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the pump reached end-of-stream and returns its sink.
    pub fn wait(self) -> Result<W, CaptureError> {
        let name = self.name;
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(CaptureError::DrainError(
                name,
                io::Error::new(io::ErrorKind::Other, "pump thread panicked"),
            )),
        }
    }
}

fn pump<R: Read, W: Write>(
    name: &str,
    mut reader: R,
    mut sink: W,
    buffer_size: usize,
) -> Result<W, CaptureError> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CaptureError::DrainError(name.to_string(), e)),
        };
        sink.write_all(&buf[..n])
            .map_err(|e| CaptureError::WriteError(name.to_string(), e))?;
    }
    sink.flush()
        .map_err(|e| CaptureError::WriteError(name.to_string(), e))?;
    Ok(sink)
}
