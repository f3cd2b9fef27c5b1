pub mod types;
pub mod byte_pipe;
pub mod pump;
pub mod tee;
#[cfg(unix)]
pub mod redirect;
#[cfg(unix)]
pub mod capture_session;
#[cfg(not(unix))]
mod unsupported;

pub use types::{ChunkRecord, OutputResult, StdStream};
pub use byte_pipe::{byte_pipe, PipeReader, PipeWriter};
pub use pump::{DrainPump, Pump};
pub use tee::{CombinedSink, Tee};
#[cfg(unix)]
pub use redirect::{is_redirected, Redirection};
#[cfg(unix)]
pub use capture_session::{capture, capture_with, CaptureSession, SessionState};
#[cfg(not(unix))]
pub use unsupported::{capture, capture_with};
