//! Descriptor-level redirection of the process standard streams.
//!
//! Installing a [`Redirection`] points descriptor 1 or 2 at the write end of a
//! fresh OS pipe, so every writer in the process (Rust `print!`, raw `write(2)`,
//! C libraries) lands in the pipe. The handle keeps a duplicate of the original
//! descriptor and the pipe read end. At most one handle per stream exists at
//! any time.
//!
//! Restoring (explicitly or on drop) flushes Rust's buffered handle into the
//! pipe, points the descriptor back at the original, and thereby drops the
//! pipe's last writer, which delivers end-of-stream to whoever reads it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error_handling::types::CaptureError;

use super::types::StdStream;

static STDOUT_ACTIVE: AtomicBool = AtomicBool::new(false);
static STDERR_ACTIVE: AtomicBool = AtomicBool::new(false);

fn active_flag(stream: StdStream) -> &'static AtomicBool {
    match stream {
        StdStream::Stdout => &STDOUT_ACTIVE,
        StdStream::Stderr => &STDERR_ACTIVE,
    }
}

/// True while a [`Redirection`] holds `stream`.
pub fn is_redirected(stream: StdStream) -> bool {
    active_flag(stream).load(Ordering::Acquire)
}

/// An active swap of one standard stream for a pipe.
#[derive(Debug)]
pub struct Redirection {
    stream: StdStream,
    saved: Option<OwnedFd>,
    reader: Option<File>,
}

impl Redirection {
    /// Swaps `stream` for the write end of a new pipe.
    ///
    /// Errors
    /// - [`CaptureError::AlreadyRedirected`] if another handle holds the stream.
    /// - [`CaptureError::RedirectionError`] if the pipe cannot be created or the
    ///   descriptor cannot be duplicated; the stream is left untouched.
    pub fn install(stream: StdStream) -> Result<Self, CaptureError> {
        let flag = active_flag(stream);
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::AlreadyRedirected(stream));
        }

        match swap_in(stream) {
            Ok((saved, reader)) => Ok(Self {
                stream,
                saved: Some(saved),
                reader: Some(reader),
            }),
            Err(e) => {
                flag.store(false, Ordering::Release);
                Err(CaptureError::RedirectionError(stream, e))
            }
        }
    }

    /// Hands out the pipe read end. Returns `None` once taken.
    pub fn take_reader(&mut self) -> Option<File> {
        self.reader.take()
    }

    /// Opens an independent handle on the original destination of the stream.
    pub fn original(&self) -> io::Result<File> {
        match &self.saved {
            Some(saved) => saved.try_clone().map(File::from),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "redirection already restored",
            )),
        }
    }

    /// Points the stream back at its original destination.
    ///
    /// Errors
    /// - [`CaptureError::RestorationError`] if `dup2` back fails. The standard
    ///   descriptor is pointed at `/dev/null` in that case, so nothing keeps
    ///   writing into the pipe and the descriptor number stays taken.
    pub fn restore(mut self) -> Result<(), CaptureError> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<(), CaptureError> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let result = swap_out(self.stream, saved);
        active_flag(self.stream).store(false, Ordering::Release);
        result.map_err(|e| CaptureError::RestorationError(self.stream, e, None))
    }
}

impl Drop for Redirection {
    fn drop(&mut self) {
        let _ = self.restore_inner();
    }
}

pub(super) fn flush_handle(stream: StdStream) -> io::Result<()> {
    match stream {
        StdStream::Stdout => io::stdout().flush(),
        StdStream::Stderr => io::stderr().flush(),
    }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn dup2_retry(src: RawFd, dst: RawFd) -> io::Result<()> {
    loop {
        // SAFETY: dup2 only manipulates the descriptor table; both numbers are
        // either owned by us or the process standard descriptors.
        match cvt(unsafe { libc::dup2(src, dst) }) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: fds has room for the two descriptors pipe(2) writes.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: pipe(2) succeeded, both descriptors are fresh and owned by nobody else.
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read_end, &write_end] {
        // SAFETY: fd is a valid open descriptor for the duration of the call.
        cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }
    Ok((read_end, write_end))
}

fn swap_in(stream: StdStream) -> io::Result<(OwnedFd, File)> {
    flush_handle(stream)?;
    let (read_end, write_end) = pipe()?;
    // SAFETY: the standard descriptor stays open for the whole call.
    let saved = unsafe { BorrowedFd::borrow_raw(stream.fd()) }.try_clone_to_owned()?;
    dup2_retry(write_end.as_raw_fd(), stream.fd())?;
    drop(write_end);
    Ok((saved, File::from(read_end)))
}

fn swap_out(stream: StdStream, saved: OwnedFd) -> io::Result<()> {
    // A failed flush means the relay behind the pipe is gone; it reports that itself.
    let _ = flush_handle(stream);
    if let Err(e) = dup2_retry(saved.as_raw_fd(), stream.fd()) {
        park_on_dev_null(stream.fd());
        return Err(e);
    }
    Ok(())
}

/// Points `fd` at `/dev/null`, dropping whatever it referred to.
///
/// The descriptor stays open so its number cannot be handed to an unrelated
/// file. Closing it is the last resort if `/dev/null` is unavailable.
fn park_on_dev_null(fd: RawFd) {
    let parked = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .and_then(|null| dup2_retry(null.as_raw_fd(), fd));
    if parked.is_err() {
        // SAFETY: fd is a standard descriptor we hold redirected; closing it
        // only drops our pipe writer.
        unsafe { libc::close(fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Read;

    // Only stderr is redirected here: the test harness reports results on stdout.

    #[test]
    #[serial]
    fn redirects_and_restores_stderr() {
        let mut redirection = Redirection::install(StdStream::Stderr).unwrap();
        assert!(is_redirected(StdStream::Stderr));
        let mut reader = redirection.take_reader().unwrap();
        assert!(redirection.take_reader().is_none());

        io::stderr().write_all(b"into the pipe\n").unwrap();
        redirection.restore().unwrap();
        assert!(!is_redirected(StdStream::Stderr));

        let mut captured = Vec::new();
        reader.read_to_end(&mut captured).unwrap();
        assert_eq!(captured, b"into the pipe\n");
    }

    #[test]
    #[serial]
    fn second_install_fails_fast() {
        let first = Redirection::install(StdStream::Stderr).unwrap();
        match Redirection::install(StdStream::Stderr) {
            Err(CaptureError::AlreadyRedirected(StdStream::Stderr)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        drop(first);
        let again = Redirection::install(StdStream::Stderr).unwrap();
        again.restore().unwrap();
    }

    #[test]
    #[serial]
    fn drop_restores_the_stream() {
        let mut redirection = Redirection::install(StdStream::Stderr).unwrap();
        let mut reader = redirection.take_reader().unwrap();
        drop(redirection);
        assert!(!is_redirected(StdStream::Stderr));

        let mut captured = Vec::new();
        reader.read_to_end(&mut captured).unwrap();
        assert!(captured.is_empty());
    }

    #[test]
    fn parked_descriptor_points_at_dev_null() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::TempDir::new().unwrap();
        let scratch = File::create(dir.path().join("scratch.log")).unwrap();
        park_on_dev_null(scratch.as_raw_fd());

        let parked = scratch.metadata().unwrap();
        let null = std::fs::metadata("/dev/null").unwrap();
        assert_eq!((parked.dev(), parked.ino()), (null.dev(), null.ino()));
        assert_eq!(parked.rdev(), null.rdev());
        (&scratch).write_all(b"discarded").unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join("scratch.log")).unwrap().len(),
            0
        );
    }

    #[test]
    #[serial]
    fn original_opens_an_independent_handle() {
        let redirection = Redirection::install(StdStream::Stderr).unwrap();
        assert!(redirection.original().is_ok());
        redirection.restore().unwrap();
    }
}
